use clap::Parser;
use codesnake::{Block, CodeWidth, Label, LineIndex};
use quo::{lexer::Span, Compiler, DebugHost, Error, Granularity, Memory, Stage, TracingHost};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use yansi::Paint;

/// Interactive front end to the Quo compiler
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Compiler stage to run (0, 1, 1a.., 2, 2a)
    #[arg(long, default_value_t = Stage::One)]
    stage: Stage,
    /// What each input line is compiled as
    #[arg(long, default_value_t = Granularity::Module)]
    mode: Granularity,
    /// Size of the memory the compiler runs in
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    memory_size: u32,
    /// End of the heap window, where string literals start
    #[arg(long, default_value_t = 15 * 1024 * 1024)]
    heap_end: u32,
}

/// Prints debug output straight to the terminal.
struct Terminal;

impl DebugHost for Terminal {
    fn puts(&mut self, text: &str) {
        print!("{}", text.dim());
    }

    fn putn(&mut self, number: u32) {
        print!("{}", number.dim());
    }
}

fn make_block<'a>(
    idx: &'a LineIndex,
    span: Span,
    message: String,
) -> Option<Block<&'a str, String>> {
    Block::new(
        idx,
        [Label::new(span)
            .with_text(message.red().to_string())
            .with_style(|s| s.red().to_string())],
    )
}

fn report(source: &str, error: &Error) {
    let idx = LineIndex::new(source);
    let block = error
        .span()
        .filter(|_| !source.is_empty())
        .map(|span| {
            // Underline the last character for errors at the end of input
            if span.is_empty() {
                let start = span.start.min(source.len()).saturating_sub(1);
                start..start + 1
            } else {
                span
            }
        })
        .and_then(|span| make_block(&idx, span, error.to_string()));

    match block {
        Some(block) => {
            let block = block.map_code(|c| CodeWidth::new(c, c.len()));
            println!("{}[input]", block.prologue());
            print!("{block}");
            println!("{}", block.epilogue());
        }
        None => println!("{} {error}", "error:".red().bold()),
    }
}

struct Session {
    args: Args,
    /// Memory of the last compilation, kept for `:heap`.
    last: Option<Memory>,
}

impl Session {
    fn compile(&mut self, source: &str) -> Result<String, Error> {
        tracing::debug!(stage = %self.args.stage, mode = %self.args.mode, "compiling input");
        let mut memory = Memory::new(self.args.memory_size);
        memory.write_raw_str(0, source.as_bytes())?;
        let heap_start = (source.len() as u32 + 1).next_multiple_of(quo::memory::GRANULE);

        let compiled = {
            let mut compiler =
                Compiler::init(&mut memory, self.args.stage, 0, heap_start, self.args.heap_end)?;
            let compiled = compiler.compile(self.args.mode);
            if compiled.is_ok() {
                compiler.clean_up()?;
            }
            compiled
        };
        let mut result = match compiled {
            Ok(result) => result,
            Err(error) => {
                self.last = Some(memory);
                return Err(error);
            }
        };
        result.flatten(&mut memory)?;
        let text = result.text(&memory)?;
        memory.dump_chunks(&mut TracingHost::default());
        self.last = Some(memory);
        Ok(text)
    }

    /// Handles a `:command` line. Returns `false` to quit.
    fn command(&mut self, line: &str) -> bool {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some(":quit" | ":q"), _) => return false,
            (Some(":stage"), Some(stage)) => match stage.parse() {
                Ok(stage) => self.args.stage = stage,
                Err(error) => println!("{} {error}", "error:".red().bold()),
            },
            (Some(":mode"), Some(mode)) => match mode.parse() {
                Ok(mode) => self.args.mode = mode,
                Err(error) => println!("{} {error}", "error:".red().bold()),
            },
            (Some(":heap"), _) => match &self.last {
                Some(memory) => {
                    memory.dump_chunks(&mut Terminal);
                    println!("{} used chunks", memory.used_chunks());
                }
                None => println!("nothing compiled yet"),
            },
            _ => println!(
                "commands: :stage <stage>, :mode <expr|stmt|block|fn|class|module>, :heap, :quit"
            ),
        }
        true
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quo=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut session = Session {
        args: Args::parse(),
        last: None,
    };
    let mut readline = rustyline::DefaultEditor::new()?;

    loop {
        let prompt = format!("quo[{} {}]> ", session.args.stage, session.args.mode);
        let Ok(input) = readline.readline(&prompt) else {
            break;
        };
        let line = input.trim();
        if line.is_empty() {
            continue;
        }
        readline.add_history_entry(line)?;

        if line.starts_with(':') {
            if !session.command(line) {
                break;
            }
            continue;
        }
        match session.compile(&input) {
            Ok(output) if output.is_empty() => println!("{}", "(no output)".dim()),
            Ok(output) => println!("{}", output.green()),
            Err(error) => report(&input, &error),
        }
    }

    Ok(())
}
