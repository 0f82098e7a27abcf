// lazybam: Streaming BAM decoding, sorting and chunk merging.
//
// Copyright 2025 Tommi Mäklin [tommi@maklin.fi].
//
// Copyrights in this project are retained by contributors. No copyright assignment
// is required to contribute to this project.
//
// Except as otherwise noted (below and/or in individual files), this
// project is licensed under the Apache License, Version 2.0
// <LICENSE-APACHE> or <http://www.apache.org/licenses/LICENSE-2.0> or
// the MIT license, <LICENSE-MIT> or <http://opensource.org/licenses/MIT>,
// at your option.
//
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use clap::Parser;

use lazybam::decoder::{Reader, ReaderBuilder};
use lazybam::encoder::WriterBuilder;
use lazybam::record::SamLine;

mod cli;

/// Initializes the logger with verbosity given in `log_max_level`.
fn init_log(log_max_level: usize) {
    // Logging is best effort, a second init in the same process is ignored
    let _ = stderrlog::new()
        .module(module_path!())
        .quiet(false)
        .verbosity(log_max_level)
        .timestamp(stderrlog::Timestamp::Off)
        .init();
}

fn view(
    input_file: &Path,
    out_file: Option<&PathBuf>,
    with_header: bool,
) -> lazybam::Result<()> {
    let reader = Reader::from_path(input_file)?;
    let header = reader.header().clone();

    let conn: Box<dyn Write> = match out_file {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(std::io::stdout().lock()),
    };
    let mut conn_out = BufWriter::new(conn);

    if with_header {
        conn_out.write_all(header.text())?;
    }
    for record in reader {
        let record = record?;
        writeln!(conn_out, "{}", SamLine { record: &record, header: &header })?;
    }
    conn_out.flush()?;
    Ok(())
}

fn sort(
    input_file: &Path,
    out_file: &Path,
    batch_size: usize,
    tmp_dir: Option<&PathBuf>,
    level: u32,
) -> lazybam::Result<()> {
    let mut reader = ReaderBuilder::new().batch_size(batch_size).from_path(input_file)?;
    let header = reader.header().clone();

    let dir = match (tmp_dir, out_file.parent()) {
        (Some(dir), _) => dir.clone(),
        (None, Some(dir)) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    // Removed with its contents when dropped
    let chunk_dir = tempfile::Builder::new().prefix(".lazybam-chunks-").tempdir_in(&dir)?;

    let config = WriterBuilder::new().compression_level(level).sort(true);
    let mut chunks: Vec<PathBuf> = Vec::new();
    for batch in reader.batches() {
        let path = chunk_dir.path().join(format!("chunk-{}.bam", chunks.len()));
        config.write_chunk(&header, batch?, &path)?;
        chunks.push(path);
    }
    log::info!("Sorted {} records into {} chunks", reader.records_read(), chunks.len());

    let result = lazybam::merge::merge(&header, &chunks, out_file, config)?;
    log::info!("Wrote {} records to {}", result.records_written, out_file.display());
    Ok(())
}

fn merge(
    input_files: &[PathBuf],
    out_file: &Path,
    no_sort: bool,
    level: u32,
) -> lazybam::Result<()> {
    let header = match input_files.first() {
        Some(path) => Reader::from_path(path)?.header().clone(),
        None => lazybam::Header::default(),
    };
    let config = WriterBuilder::new().compression_level(level).sort(!no_sort);
    let result = lazybam::merge::merge(&header, input_files, out_file, config)?;
    log::info!("Merged {} records from {} chunks", result.records_written, result.chunks_merged);
    Ok(())
}

fn main() {
    let cli = cli::Cli::parse();

    if cli.threads > 0 {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(cli.threads).build_global() {
            eprintln!("Could not set thread count: {e}");
        }
    }

    // Subcommands:
    let res = match &cli.command {
        // View
        Some(cli::Commands::View {
            input_file,
            out_file,
            with_header,
            verbose,
        }) => {
            init_log(if *verbose { 2 } else { 1 });
            view(input_file, out_file.as_ref(), *with_header)
        },

        // Sort
        Some(cli::Commands::Sort {
            input_file,
            out_file,
            batch_size,
            tmp_dir,
            level,
            verbose,
        }) => {
            init_log(if *verbose { 2 } else { 1 });
            sort(input_file, out_file, *batch_size, tmp_dir.as_ref(), *level)
        },

        // Merge
        Some(cli::Commands::Merge {
            input_files,
            out_file,
            no_sort,
            level,
            verbose,
        }) => {
            init_log(if *verbose { 2 } else { 1 });
            merge(input_files, out_file, *no_sort, *level)
        },
        None => Ok(()),
    };

    if let Err(e) = res {
        eprintln!("lazybam: {e}");
        std::process::exit(1);
    }
}
