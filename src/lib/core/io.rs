use anyhow::Result;
use grep_cli::stdout;
use gzp::{deflate::Gzip, Compression, ZBuilder};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use termcolor::ColorChoice;

/// Build a TSV writer targeting a file or stdout with optional gzip compression.
pub fn get_writer<P: AsRef<Path>>(
    path: &Option<P>,
    gzipped: bool,
    write_headers: bool,
    threads: usize,
    compression_level: u32,
) -> Result<csv::Writer<Box<dyn Write>>> {
    let raw_writer: Box<dyn Write> = match path {
        Some(path) if path.as_ref().to_str() != Some("-") => {
            let writer = BufWriter::new(File::create(path)?);
            if gzipped {
                Box::new(
                    ZBuilder::<Gzip, _>::new()
                        .num_threads(threads)
                        .compression_level(Compression::new(compression_level))
                        .from_writer(writer),
                )
            } else {
                Box::new(writer)
            }
        }
        _ => {
            let writer = stdout(ColorChoice::Never);
            if gzipped {
                Box::new(
                    ZBuilder::<Gzip, _>::new()
                        .num_threads(threads)
                        .compression_level(Compression::new(compression_level))
                        .from_writer(writer),
                )
            } else {
                Box::new(writer)
            }
        }
    };

    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(write_headers)
        .from_writer(raw_writer))
}
