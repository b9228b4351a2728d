use std::fs;
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;

use rvcc::mir::{fold, lower};
use rvcc::{codegen, SourceFile};

/// Compile a C source file (assumed preprocessed) to RV64 assembly
#[derive(Clone, Debug, Parser)]
struct Args {
    /// input C source file
    input: PathBuf,
    /// output assembly file
    #[arg(short, long, default_value = "./codegen_output.s")]
    output: PathBuf,
    /// suppress dumping the parse tree, MIR and assembly to stdout
    #[arg(long)]
    no_print: bool,
    /// disable the constant folding pass
    #[arg(long)]
    no_fold: bool,
}

fn main() {
    let args = Args::parse();

    let source = match SourceFile::load(&args.input) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("{error:#}");
            exit(2);
        }
    };

    let outcome = rvcc::parser::Parser::new(&source).parse_program();
    if outcome.tokenize_errors > 0 {
        eprintln!("[tokenizer] {} errors generated.", outcome.tokenize_errors);
        exit(1);
    }
    println!("[parser] {} errors generated.", outcome.parse_errors);
    if outcome.parse_errors > 0 {
        exit(outcome.parse_errors.min(255) as i32);
    }

    let mut ast = outcome.ast;
    if !args.no_fold {
        fold::fold_program(&mut ast, &source.text);
    }
    if !args.no_print {
        println!("{ast:#?}");
    }

    let lowered = lower::lower(&mut ast, &source);
    if lowered.errors > 0 {
        eprintln!("[lowering] {} errors generated.", lowered.errors);
        exit(1);
    }
    if !args.no_print {
        println!("{:#?}", lowered.mir);
    }

    let assembly = codegen::generate(&lowered.mir);
    if !args.no_print {
        println!("{assembly}");
    }

    if let Err(error) = fs::write(&args.output, &assembly) {
        eprintln!("writing {}: {error}", args.output.display());
        exit(2);
    }
    println!("assembly written to {}", args.output.display());
}
