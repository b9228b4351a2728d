#![forbid(unsafe_code)]
//! Compiler for a C subset targeting RV64GC with the LP64D calling
//! convention. The pipeline is strictly staged: tokenize, parse with
//! context checking, optionally fold constants, lower to the MIR, emit
//! assembly. A stage that reported errors stops the pipeline.

pub mod arena;
pub mod ast;
pub mod codegen;
pub mod diag;
pub mod lexer;
pub mod mir;
pub mod parser;

#[cfg(test)]
mod test;

use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};

/// Source buffer; token splices point into `text` and must not outlive it.
#[derive(Debug)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        SourceFile {
            name: name.into(),
            text: text.into(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(SourceFile {
            name: path.display().to_string(),
            text,
        })
    }
}

#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Fold pure constant subtrees after parsing.
    pub fold: bool,
    /// Dump the parse tree, MIR and assembly to stdout.
    pub print: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            fold: true,
            print: false,
        }
    }
}

/// Runs the whole pipeline; returns the assembly text.
pub fn compile_source(source: &SourceFile, options: &CompileOptions) -> Result<String> {
    let outcome = parser::Parser::new(source).parse_program();
    ensure!(
        outcome.tokenize_errors == 0,
        "tokenizer reported {} errors",
        outcome.tokenize_errors
    );
    ensure!(
        outcome.parse_errors == 0,
        "parser reported {} errors",
        outcome.parse_errors
    );

    let mut ast = outcome.ast;
    if options.fold {
        mir::fold::fold_program(&mut ast, &source.text);
    }
    if options.print {
        println!("{ast:#?}");
    }

    let lowered = mir::lower::lower(&mut ast, source);
    ensure!(
        lowered.errors == 0,
        "lowering reported {} errors",
        lowered.errors
    );
    if options.print {
        println!("{:#?}", lowered.mir);
    }

    let assembly = codegen::generate(&lowered.mir);
    if options.print {
        println!("{assembly}");
    }
    Ok(assembly)
}

pub fn compile_file(input: &Path, options: &CompileOptions) -> Result<String> {
    let source = SourceFile::load(input)?;
    compile_source(&source, options)
}
