use jynx::assemble::{self, AssembledMethod};
use jynx::jvm::{Name, RenderDescriptor, Severity, Version};

use clap::{value_parser, Arg, ArgAction, Command};
use std::fs;
use std::process;

fn main() -> Result<(), assemble::Error> {
    env_logger::init();

    let matches = Command::new("JVM method assembler")
        .version("0.1.0")
        .author("Alec Theriault <alec.theriault@gmail.com>")
        .about("Assemble method listings into JVM bytecode, checking frames along the way")
        .arg(
            Arg::new("target")
                .long("target")
                .value_name("RELEASE")
                .required(false)
                .help("Java release the class file targets (eg. `8`, `17`, or `1.6`)")
                .default_value("17"),
        )
        .arg(
            Arg::new("symbolic-locals")
                .long("symbolic-locals")
                .action(ArgAction::SetTrue)
                .help("Allow locals to be referred to by name"),
        )
        .arg(
            Arg::new("warn-unused")
                .long("warn-unused")
                .action(ArgAction::SetTrue)
                .help("Warn about locals that are written but never read"),
        )
        .arg(
            Arg::new("max-locals")
                .long("max-locals")
                .value_name("SLOTS")
                .required(false)
                .value_parser(value_parser!(u16))
                .help("Limit the number of local variable slots"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Sets the input listing to assemble")
                .required(true)
                .index(1),
        )
        .get_matches();

    let mut settings = assemble::Settings::new();
    if let Some(release) = matches.get_one::<String>("target") {
        settings.version = Version::from_release(release).ok_or_else(|| assemble::Error::Parse {
            line: 0,
            message: format!("unknown Java release '{}'", release),
        })?;
    }
    settings.symbolic_locals = matches.get_flag("symbolic-locals");
    settings.warn_unused = matches.get_flag("warn-unused");
    settings.max_locals = matches.get_one::<u16>("max-locals").copied();

    let input = matches
        .get_one::<String>("INPUT")
        .expect("INPUT is a required argument");
    log::info!("Reading and assembling '{}'", input);
    let source = fs::read_to_string(input)?;
    let methods = assemble::assemble_listing(&source, &settings)?;

    let mut failed = false;
    for method in &methods {
        print_method(method);
        failed |= method.has_errors();
    }

    if failed {
        log::error!("Assembled with errors");
        process::exit(1);
    }
    Ok(())
}

fn print_method(method: &AssembledMethod) {
    println!(
        "{}{}  max_stack={} max_locals={} length={}",
        method.name.as_str(),
        method.descriptor.render(),
        method.max_stack,
        method.max_locals,
        method.code.len()
    );

    for (label, offset) in &method.label_offsets {
        println!("  {:>5}: {}", offset, label);
    }

    for (offset, chunk) in method.code.chunks(16).enumerate() {
        let bytes: Vec<String> = chunk.iter().map(|byte| format!("{:02x}", byte)).collect();
        println!("  {:05} {}", offset * 16, bytes.join(" "));
    }

    for handler in &method.exception_table {
        println!(
            "  catch {} [{}, {}) -> {}",
            handler
                .catch_type
                .as_ref()
                .map_or("all", |class| class.as_str()),
            handler.start_pc,
            handler.end_pc,
            handler.handler_pc
        );
    }

    for diagnostic in &method.diagnostics {
        let marker = match diagnostic.severity {
            Severity::Error => "!!",
            Severity::Warning => "??",
        };
        println!("  {} {}", marker, diagnostic);
    }
}
