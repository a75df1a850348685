//! Interactive `.lclass` assembler: prompts for a class description on
//! stdin and writes the encoded file.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use hotl::class::{writer, ClassFile, FieldEntry, MethodEntry, MethodRef};
use hotl::AccessFlags;

#[derive(Parser)]
#[command(name = "hotl-compile", about = "Assemble a .lclass file from prompts")]
struct Args {
    /// Output file
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let output = args.output.unwrap_or_else(|| {
        eprintln!("Missing output file argument, using default 'Test.lclass'");
        PathBuf::from("Test.lclass")
    });

    let class = match read_class() {
        Ok(class) => class,
        Err(error) => {
            eprintln!("Reading input failed: {error}");
            return ExitCode::FAILURE;
        }
    };

    let file = match File::create(&output) {
        Ok(file) => file,
        Err(error) => {
            eprintln!("Could not create '{}': {error}", output.display());
            return ExitCode::FAILURE;
        }
    };
    let mut file = BufWriter::new(file);
    if let Err(error) = writer::encode(&class, &mut file).and_then(|()| file.flush()) {
        eprintln!("Could not write '{}': {error}", output.display());
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn read_class() -> io::Result<ClassFile> {
    let name = first_word(&prompt("Class name: ")?);

    let mut supers = Vec::new();
    loop {
        let super_name = prompt("Super class name: ")?;
        if super_name.is_empty() {
            break;
        }
        supers.push(first_word(&super_name));
    }

    let mut fields = Vec::new();
    loop {
        let field_name = prompt("Field name: ")?;
        if field_name.is_empty() {
            break;
        }
        fields.push(FieldEntry {
            access_flags: AccessFlags::PUBLIC,
            name: first_word(&field_name),
            descriptor: first_word(&prompt("Field descriptor: ")?),
            attributes: Vec::new(),
        });
    }

    let mut methods = Vec::new();
    loop {
        let method_name = prompt("Method name: ")?;
        if method_name.is_empty() {
            break;
        }
        let descriptor = first_word(&prompt("Method descriptor: ")?);

        println!("Method code:");
        let mut code = Vec::new();
        loop {
            let line = prompt("")?;
            if line.is_empty() {
                break;
            }
            read_code_line(&line, &mut code);
        }

        let mut method_refs = Vec::new();
        loop {
            let class_name = prompt("Method ref class name: ")?;
            if class_name.is_empty() {
                break;
            }
            let method_descriptor = first_word(&prompt("Method ref method descriptor: ")?);
            let byte_offset = loop {
                let offset = prompt("Method ref code offset: ")?;
                match first_word(&offset).parse::<u32>() {
                    Ok(offset) => break offset,
                    Err(_) => println!("Warning code offset is not an integer"),
                }
            };
            method_refs.push(MethodRef {
                class_name: first_word(&class_name),
                method_descriptor,
                byte_offset,
            });
        }

        methods.push(MethodEntry {
            access_flags: AccessFlags::PUBLIC,
            name: first_word(&method_name),
            descriptor,
            code,
            method_refs,
            attributes: Vec::new(),
        });
    }

    Ok(ClassFile {
        name,
        access_flags: AccessFlags::PUBLIC,
        supers,
        fields,
        methods,
        attributes: Vec::new(),
    })
}

fn prompt(message: &str) -> io::Result<String> {
    print!("{message}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}

fn first_word(line: &str) -> String {
    line.split_whitespace().next().unwrap_or("").to_string()
}

/// Appends the bytes of a whitespace-separated hex line; tokens with an
/// odd nibble count or non-hex digits are warned about and skipped whole.
fn read_code_line(line: &str, code: &mut Vec<u8>) {
    for token in line.split_whitespace() {
        let nibbles = token.as_bytes();
        if nibbles.len() % 2 == 1 {
            println!("Warning you passed an odd number of nibbles (4 bits), skipping '{token}'");
            continue;
        }
        let mut bytes = Vec::with_capacity(nibbles.len() / 2);
        let mut valid = true;
        for (index, pair) in nibbles.chunks_exact(2).enumerate() {
            match (hex_value(pair[0]), hex_value(pair[1])) {
                (Some(high), Some(low)) => bytes.push(high << 4 | low),
                _ => {
                    println!(
                        "Warning nibble pair {index} is not hex (0-9, a-f, A-F), skipping '{token}'"
                    );
                    valid = false;
                    break;
                }
            }
        }
        if valid {
            code.extend_from_slice(&bytes);
        }
    }
}

fn hex_value(nibble: u8) -> Option<u8> {
    match nibble {
        b'0'..=b'9' => Some(nibble - b'0'),
        b'a'..=b'f' => Some(10 + nibble - b'a'),
        b'A'..=b'F' => Some(10 + nibble - b'A'),
        _ => None,
    }
}
