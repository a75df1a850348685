//! Demo driver: load a class from the class path, print it, invoke one of
//! its methods.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use once_cell::sync::Lazy;

use hotl::runtime::{Class, ClassRegistry, Method};

// trampolines bake the registry address into generated code, so the
// registry lives in a static and never moves
static REGISTRY: Lazy<ClassRegistry> = Lazy::new(ClassRegistry::new);

#[derive(Parser)]
#[command(name = "hotl-run", about = "Load a .lclass class and invoke a method")]
struct Args {
    /// Class name to load
    #[arg(default_value = "Test")]
    class: String,

    /// Directory searched for .lclass files, repeatable, in search order
    #[arg(short = 'c', long = "class-path")]
    class_paths: Vec<PathBuf>,

    /// Descriptor of the method to invoke
    #[arg(short, long, default_value = "P")]
    descriptor: String,

    /// Up to three integer arguments, passed in rcx/rdx/r8
    #[arg(num_args = 0..=3, last = true)]
    args: Vec<u64>,

    /// Print the class without invoking anything
    #[arg(long)]
    no_invoke: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    for class_path in resolve_class_paths(&args.class_paths) {
        REGISTRY.add_class_path(class_path);
    }

    let class = match REGISTRY.load_class(&args.class) {
        Ok(class) => class,
        Err(status) => {
            eprintln!("Class could not be loaded: '{status}'");
            return ExitCode::FAILURE;
        }
    };
    print_class(&class);

    if args.no_invoke {
        return ExitCode::SUCCESS;
    }

    let Some(method) = class.get_method_from_descriptor(&args.descriptor) else {
        eprintln!(
            "Method descriptor '{}' not found in class '{}'",
            args.descriptor,
            class.name()
        );
        return ExitCode::FAILURE;
    };
    if !method.is_invokable() {
        eprintln!("Method '{}' has no code", method.name());
        return ExitCode::FAILURE;
    }

    let arg = |index: usize| args.args.get(index).copied().unwrap_or(0);
    // the loader trusts the code it patched; invoking it is inherently
    // unsafe
    let result = unsafe { method.invoke(arg(0), arg(1), arg(2)) };
    println!("Returned: {result:X}");
    ExitCode::SUCCESS
}

/// Argument > `HOTL_CLASSPATH` environment variable > current directory.
fn resolve_class_paths(from_args: &[PathBuf]) -> Vec<PathBuf> {
    if !from_args.is_empty() {
        return from_args.to_vec();
    }
    if let Ok(class_path) = env::var("HOTL_CLASSPATH") {
        if !class_path.is_empty() {
            return env::split_paths(&class_path).collect();
        }
    }
    vec![PathBuf::from(".")]
}

fn print_class(class: &Class) {
    println!("Class '{}'", class.name());
    println!("\tAccess Flags: '{}'", class.access_flags());
    for super_class in class.supers() {
        println!("\tSuper '{}'", super_class.name());
    }
    for field in class.fields() {
        println!("\tField '{}'", field.name());
        println!("\t\tDescriptor: '{}'", field.descriptor());
        println!("\t\tAccessFlags: '{}'", field.access_flags());
    }
    for method in class.methods() {
        print_method(method);
    }
}

fn print_method(method: &Method) {
    println!("\tMethod '{}'", method.name());
    println!("\t\tDescriptor: '{}'", method.descriptor());
    println!("\t\tAccessFlags: '{}'", method.access_flags());
    let Some(code) = method.code_bytes() else {
        return;
    };
    println!("\t\tCode:");
    print!("\t\t\t");
    let mut column = 0;
    for byte in code {
        if column > 0 {
            if column % 8 == 0 {
                print!("  ");
            } else {
                print!(" ");
            }
        }
        print!("{byte:02X}");
        column += 1;
        if column >= 16 {
            print!("\n\t\t\t");
            column = 0;
        }
    }
    println!();
}
