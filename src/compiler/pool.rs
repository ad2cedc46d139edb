//! String literal pool.
//!
//! Literals are laid out NUL terminated one after the other from the end of
//! the heap window, where the emitted data segments place them at load time.
use lasso::{Key, Rodeo};

#[derive(Debug)]
pub struct StringPool {
    literals: Rodeo,
    addresses: Vec<u32>,
    next: u32,
}

impl StringPool {
    pub fn new(base: u32) -> Self {
        Self {
            literals: Rodeo::new(),
            addresses: Vec::new(),
            next: base,
        }
    }

    /// Address of `literal`, reserving one on first sight.
    pub fn intern(&mut self, literal: &str) -> u32 {
        let key = self.literals.get_or_intern(literal).into_usize();
        if key == self.addresses.len() {
            self.addresses.push(self.next);
            self.next = self.next.wrapping_add(literal.len() as u32 + 1);
        }
        self.addresses[key]
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Every literal with its address, in the order they were first seen.
    pub fn segments(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        self.literals
            .iter()
            .map(|(key, literal)| (self.addresses[key.into_usize()], literal))
    }
}

/// Escapes bytes for a data segment string. The terminating NUL is not added.
pub fn escape_data(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for byte in literal.bytes() {
        match byte {
            b'"' | b'\\' => escaped.push_str(&format!("\\{byte:02x}")),
            0x20..=0x7e => escaped.push(byte as char),
            _ => escaped.push_str(&format!("\\{byte:02x}")),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::{escape_data, StringPool};
    use assert2::check;

    #[test]
    fn literals_are_packed_and_shared() {
        let mut pool = StringPool::new(1000);
        check!(pool.intern("hello") == 1000);
        check!(pool.intern("") == 1006);
        check!(pool.intern("hello") == 1000);
        check!(pool.intern("x") == 1007);
        check!(pool.len() == 3);
        check!(pool.segments().collect::<Vec<_>>() == [(1000, "hello"), (1006, ""), (1007, "x")]);
    }

    #[test]
    fn data_escapes() {
        check!(escape_data("plain text") == "plain text");
        check!(escape_data("a\"b\\c") == "a\\22b\\5cc");
        check!(escape_data("line\n\0") == "line\\0a\\00");
        check!(escape_data("é") == "\\c3\\a9");
    }
}
