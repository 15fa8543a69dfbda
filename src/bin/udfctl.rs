use std::{fs::File, io::Write, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use udfstream::{DirectoryEntry, RangeCachingReader, RangeSource, Section, Volume};

type Source = Box<dyn RangeSource>;

/// udfctl
///
/// Inspects UDF images (DVD and Blu-ray ISOs), either local or served over HTTP.  Remote images
/// are read with byte-range requests, so only the parts that are needed get downloaded.
#[derive(Debug, Parser)]
#[clap(name = "udfctl", version)]
pub struct App {
    /// HTTP request timeout, in seconds
    #[clap(long, default_value_t = 300)]
    timeout: u64,

    /// Byte offset of the image within the source
    #[clap(long, default_value_t = 0)]
    offset: u64,

    /// Length of the image within the source (defaults to the rest of the source)
    #[clap(long)]
    length: Option<u64>,

    /// The image: an http(s) URL or a local path
    source: String,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Shows the volume identifiers and partition layout
    Info,
    /// Lists a directory
    Ls {
        /// the directory to list (defaults to the root)
        #[clap(default_value = "/")]
        path: String,
        /// show kind, size, modification time and image offset
        #[clap(short, long)]
        long: bool,
        /// descend into subdirectories
        #[clap(short = 'R', long)]
        recursive: bool,
    },
    /// Writes a file to stdout
    Cat { path: String },
    /// Copies a file out of the image
    Extract { path: String, dest: PathBuf },
}

fn open_source(args: &App) -> Result<Source> {
    let source = args.source.as_str();
    if source.starts_with("http://") || source.starts_with("https://") {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(args.timeout))
            .build()?;
        let reader = RangeCachingReader::with_client(client, source)?;
        Ok(Box::new(reader.section(args.offset, args.length)))
    } else {
        let file = File::open(source).with_context(|| format!("opening {source}"))?;
        match args.length {
            Some(length) => Ok(Box::new(Section::new(file, args.offset, length))),
            None => Ok(Box::new(Section::from_offset(file, args.offset))),
        }
    }
}

fn print_entry(entry: &DirectoryEntry<Source>, path: &str, long: bool) -> Result<()> {
    let suffix = if entry.is_directory()? { "/" } else { "" };
    if long {
        let modified = match entry.modified_time()? {
            Some(time) => time.to_string(),
            None => "-".to_string(),
        };
        println!(
            "{} {:>14} {:>14} {modified} {path}{suffix}",
            if entry.is_directory()? { 'd' } else { '-' },
            entry.size()?,
            entry.extent_offset()?,
        );
    } else {
        println!("{path}{suffix}");
    }
    Ok(())
}

fn list(dir: &DirectoryEntry<Source>, prefix: &str, long: bool, recursive: bool) -> Result<()> {
    for child in dir.list()? {
        let path = format!("{prefix}{}", child.name());
        print_entry(&child, &path, long)?;
        if recursive && child.is_directory()? {
            list(&child, &format!("{path}/"), long, recursive)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let args = App::parse();

    let source = open_source(&args)?;
    let volume = Volume::open(source).with_context(|| format!("opening {}", args.source))?;

    match args.cmd {
        Command::Info => {
            println!("volume identifier:         {}", volume.volume_identifier());
            println!(
                "logical volume identifier: {}",
                volume.logical_volume_identifier()
            );
            println!("file set identifier:       {}", volume.file_set_identifier());
            println!("partition start:           sector {}", volume.partition_start());
        }
        Command::Ls {
            ref path,
            long,
            recursive,
        } => {
            let dir = volume.open_path(path)?;
            let prefix = match path.trim_matches('/') {
                "" | "." => String::new(),
                trimmed => format!("{trimmed}/"),
            };
            list(&dir, &prefix, long, recursive)?;
        }
        Command::Cat { ref path } => {
            let file = volume.open_path(path)?;
            let mut stdout = std::io::stdout().lock();
            file.copy_to(&mut stdout)?;
            stdout.flush()?;
        }
        Command::Extract { ref path, ref dest } => {
            let file = volume.open_path(path)?;
            let mut output =
                File::create(dest).with_context(|| format!("creating {}", dest.display()))?;
            let copied = file.copy_to(&mut output)?;
            log::info!("extracted {copied} bytes to {}", dest.display());
        }
    }

    Ok(())
}
