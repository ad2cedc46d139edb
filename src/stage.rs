//! Bootstrap stages.
//!
//! Each stage accepts a superset of the language of the stage before it and
//! must produce byte-identical output for every program the earlier stage
//! accepts.
use core::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Stage {
    /// Host-side compiler: output is built outside of the runtime and copied
    /// into the window at the end.
    Zero,
    /// Everything (buffers and symbol tables) lives in the runtime.
    #[default]
    One,
    /// Adds type annotations, classes, imports, `new`, member access and subscripts.
    Two,
}

/// Language features that are not available from the first stage on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    TypeAnnotations,
    Classes,
    Imports,
    ObjectConstruction,
    MemberAccess,
}

impl Feature {
    pub fn introduced_in(self) -> Stage {
        match self {
            Feature::TypeAnnotations
            | Feature::Classes
            | Feature::Imports
            | Feature::ObjectConstruction
            | Feature::MemberAccess => Stage::Two,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Feature::TypeAnnotations => "type annotations",
            Feature::Classes => "classes",
            Feature::Imports => "imports",
            Feature::ObjectConstruction => "object construction",
            Feature::MemberAccess => "member access",
        })
    }
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Zero, Stage::One, Stage::Two];

    pub fn supports(self, feature: Feature) -> bool {
        self >= feature.introduced_in()
    }

    /// Whether compiler state is kept in the memory window.
    pub fn uses_runtime(self) -> bool {
        self >= Stage::One
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Zero => "0",
            Stage::One => "1",
            Stage::Two => "2",
        })
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown stage `{0}`")]
pub struct UnknownStage(pub Box<str>);

impl FromStr for Stage {
    type Err = UnknownStage;

    /// Accepts the stage number optionally followed by a build letter
    /// (`1a`, `1b`, ...); builds of one stage share its language.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = s.trim_end_matches(|c: char| c.is_ascii_lowercase());
        match level {
            "0" if level.len() == s.len() => Ok(Stage::Zero),
            "1" => Ok(Stage::One),
            "2" => Ok(Stage::Two),
            _ => Err(UnknownStage(Box::from(s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Feature, Stage};
    use assert2::check;

    #[test]
    fn parse_stage_names() {
        check!("0".parse() == Ok(Stage::Zero));
        check!("1".parse() == Ok(Stage::One));
        check!("1a".parse() == Ok(Stage::One));
        check!("1c".parse() == Ok(Stage::One));
        check!("2a".parse() == Ok(Stage::Two));
        check!("3".parse::<Stage>().is_err());
        check!("0a".parse::<Stage>().is_err());
        check!("".parse::<Stage>().is_err());
    }

    #[test]
    fn features_are_monotonic() {
        check!(!Stage::One.supports(Feature::Classes));
        check!(Stage::Two.supports(Feature::Classes));
        check!(!Stage::Zero.uses_runtime());
        check!(Stage::One.uses_runtime());
    }
}
