//! The compiler driver: sources in, one JavaScript program out.

pub mod file_tree;

use std::path::PathBuf;

use tracing::{debug, info};

use crate::{
    cst::TemplateSet,
    encode::Generator,
    errors::{CompileError, CompileResult, ErrorPrinter},
    mir::{Instantiator, Program},
    parse::parse_module,
};

use file_tree::{FileId, SourceRegistry};

pub const PRELUDE: &str = include_str!("../prelude.tt");
pub const PRELUDE_URI: &str = "<prelude>";

#[derive(Clone, Debug)]
pub struct CompilerConfig {
    /// Register the prelude ahead of every user source
    pub include_prelude: bool,

    /// How many times one template may re-instantiate itself along a demand chain
    pub max_instantiation_depth: usize,

    pub emit_type_comments: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            include_prelude: true,
            max_instantiation_depth: 64,
            emit_type_comments: true,
        }
    }
}

pub struct Compiler {
    config: CompilerConfig,
    sources: SourceRegistry,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Compiler {
        let mut sources = SourceRegistry::new();

        if config.include_prelude {
            sources.add(PRELUDE_URI, PRELUDE);
        }

        Compiler { config, sources }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Sources are compiled in the order they are added
    pub fn add_source(&mut self, uri: impl Into<String>, text: impl Into<String>) -> FileId {
        self.sources.add(uri, text)
    }

    /// Parses and merges every source, then runs instantiation from `main`
    pub fn instantiate(&self) -> CompileResult<Program> {
        let mut or_ids = 0;

        let modules = self
            .sources
            .files()
            .map(|f| {
                debug!("parsing {}", f.uri());
                parse_module(f, &mut or_ids)
            })
            .collect::<CompileResult<Vec<_>>>()?;

        let set = TemplateSet::merge(modules)?;

        Instantiator::new(&set, self.config.max_instantiation_depth).run()
    }

    pub fn compile(&self) -> CompileResult<String> {
        info!("compiling {} sources", self.sources.len());

        let program = self.instantiate()?;
        let out = Generator::new(&program, &self.sources, self.config.emit_type_comments).generate()?;

        info!("generated {} bytes of javascript", out.len());

        Ok(out)
    }

    /// An error rendered against the sources it came from
    pub fn render_error(&self, e: &CompileError) -> String {
        ErrorPrinter::new(&self.sources).render(e)
    }
}

/// What the command line asked for
#[derive(Clone, Debug, Default)]
pub struct Invocation {
    pub inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub config: CompilerConfig,
    pub verbosity: u8,
}

/// Reads `ttc [files or dirs...] [-o out] [--no-prelude] [--max-depth n] [--no-type-comments] [-v|-vv]`
pub fn parse_args(args: &[&str]) -> Result<Invocation, String> {
    #[derive(Clone, Copy)]
    enum State {
        ExpectInput,
        ExpectOutput,
        ExpectDepth,
    }

    let mut state = State::ExpectInput;
    let mut inv = Invocation::default();

    for &arg in args {
        match (arg, state) {
            (_, State::ExpectOutput) => {
                inv.output = Some(PathBuf::from(arg));
                state = State::ExpectInput;
            }
            (_, State::ExpectDepth) => {
                inv.config.max_instantiation_depth = arg
                    .parse()
                    .map_err(|_| format!("expected a depth after --max-depth, got '{arg}'"))?;
                state = State::ExpectInput;
            }
            ("-o", _) => state = State::ExpectOutput,
            ("--max-depth", _) => state = State::ExpectDepth,
            ("--no-prelude", _) => inv.config.include_prelude = false,
            ("--no-type-comments", _) => inv.config.emit_type_comments = false,
            ("-v", _) => inv.verbosity = inv.verbosity.max(1),
            ("-vv", _) => inv.verbosity = 2,
            (other, State::ExpectInput) if other.starts_with('-') => {
                return Err(format!("unknown flag '{other}'"));
            }
            (other, State::ExpectInput) => inv.inputs.push(PathBuf::from(other)),
        }
    }

    match state {
        State::ExpectOutput => Err("-o needs a file".to_owned()),
        State::ExpectDepth => Err("--max-depth needs a number".to_owned()),
        State::ExpectInput if inv.inputs.is_empty() => Err("no input files".to_owned()),
        State::ExpectInput => Ok(inv),
    }
}

/// Runs one command line invocation, returning the process exit code
pub fn launch(inv: Invocation) -> i32 {
    let paths = match file_tree::expand_paths(&inv.inputs) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("could not read the input tree: {e}");
            return 2;
        }
    };

    let mut compiler = Compiler::new(inv.config);

    for p in paths.iter() {
        match std::fs::read_to_string(p) {
            Ok(text) => {
                debug!("adding source {}", p.display());
                compiler.add_source(p.to_string_lossy(), text);
            }
            Err(e) => {
                eprintln!("could not read {}: {e}", p.display());
                return 2;
            }
        }
    }

    let js = match compiler.compile() {
        Ok(js) => js,
        Err(e) => {
            eprint!("{}", compiler.render_error(&e));
            return 1;
        }
    };

    let written = match &inv.output {
        Some(out) => std::fs::write(out, js),
        None => std::io::Write::write_all(&mut std::io::stdout(), js.as_bytes()),
    };

    match written {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("could not write the output: {e}");
            2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_fill_the_config() {
        let inv = parse_args(&["a.tt", "-o", "out.js", "--max-depth", "8", "--no-prelude", "-vv", "lib"])
            .unwrap();

        assert_eq!(inv.inputs, vec![PathBuf::from("a.tt"), PathBuf::from("lib")]);
        assert_eq!(inv.output, Some(PathBuf::from("out.js")));
        assert_eq!(inv.config.max_instantiation_depth, 8);
        assert!(!inv.config.include_prelude);
        assert!(inv.config.emit_type_comments);
        assert_eq!(inv.verbosity, 2);
    }

    #[test]
    fn bad_arguments() {
        assert!(parse_args(&[]).is_err());
        assert!(parse_args(&["a.tt", "-o"]).is_err());
        assert!(parse_args(&["a.tt", "--max-depth", "deep"]).is_err());
        assert!(parse_args(&["a.tt", "--fast"]).is_err());
    }

    #[test]
    fn prelude_comes_first() {
        let mut c = Compiler::new(CompilerConfig::default());
        let id = c.add_source("main.tt", "fn main() { }");

        assert_eq!(c.sources().uri(0), PRELUDE_URI);
        assert_eq!(id, 1);
    }

    #[test]
    fn prelude_compiles_on_its_own() {
        let mut c = Compiler::new(CompilerConfig::default());
        c.add_source("main.tt", "fn main() { print(1 + 2); }");

        let program = c.instantiate().unwrap();
        assert!(program.main.is_some());
    }
}
