use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pdf_objstore::parser::Location;
use pdf_objstore::{ObjectId, ParseOptions, PdfDocument};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pdfobj",
    about = "Inspect the object table of a PDF file",
    version,
    author
)]
struct Cli {
    /// Log resolution details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Fail on malformed structure instead of recovering
    #[arg(long, global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the header, trailer and object table
    Info {
        /// Input PDF file
        input: PathBuf,
    },

    /// List every slot of the object table
    Xref {
        /// Input PDF file
        input: PathBuf,
    },

    /// Print one resolved object
    Object {
        /// Input PDF file
        input: PathBuf,

        /// Object number
        number: u32,

        /// Generation number
        #[arg(default_value_t = 0)]
        generation: u16,
    },

    /// List the pages in document order
    Pages {
        /// Input PDF file
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let options = if cli.strict {
        ParseOptions::strict()
    } else {
        ParseOptions::lenient()
    };

    match cli.command {
        Commands::Info { input } => {
            let document = open(&input, options)?;

            println!("PDF Information for: {}", input.display());
            println!("==========================================");
            match document.version() {
                Some(version) => println!("PDF Version: {}", version),
                None => println!("PDF Version: unknown"),
            }

            let trailer = document.trailer();
            println!("Trailer keys: {}", trailer.dict().sorted_keys().join(", "));
            println!("Trailers: {}", document.trailers().len());

            let stats = document.store().stats();
            println!("Slots: {}", stats.slots);
            println!("  at byte offset: {}", stats.byte_offset);
            println!("  in object streams: {}", stats.in_container);
            println!("  free: {}", stats.free);
            println!("  unresolved: {}", stats.unresolved);

            match document.page_count() {
                Ok(count) => println!("Pages: {}", count),
                Err(e) => println!("Pages: unavailable ({})", e),
            }
            println!("Encrypted: {}", document.is_encrypted());
            println!("Recovered: {}", document.was_recovered());
        }

        Commands::Xref { input } => {
            let document = open(&input, options)?;
            let mut references: Vec<_> = document.store().references().collect();
            references.sort_by_key(|reference| reference.id().number);

            for reference in references {
                let location = match reference.location() {
                    Some(Location::ByteOffset(offset)) => format!("offset {}", offset),
                    Some(Location::InContainer { container, index }) => {
                        format!("stream {} index {}", container, index)
                    }
                    Some(Location::Free) => "free".to_string(),
                    Some(Location::Unresolved) | None => "unresolved".to_string(),
                };
                println!("{:>12}  {}", reference.id().to_string(), location);
            }
        }

        Commands::Object {
            input,
            number,
            generation,
        } => {
            let document = open(&input, options)?;
            let id = ObjectId::new(number, generation);
            let object = document
                .resolve(id)
                .with_context(|| format!("Failed to resolve {}", id))?;
            println!("{:#?}", object);
        }

        Commands::Pages { input } => {
            let document = open(&input, options)?;
            let tree = document.page_tree().context("Failed to read page tree")?;
            for (index, page) in tree.pages()?.enumerate() {
                println!("{:>6}  {}", index, page);
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open(path: &Path, options: ParseOptions) -> Result<PdfDocument> {
    PdfDocument::open_with_options(path, options)
        .with_context(|| format!("Failed to open PDF: {}", path.display()))
}
