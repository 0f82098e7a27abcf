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
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    // Threads for block compression, 0 uses all cores
    #[arg(short = 't', long = "threads", default_value_t = 0, global = true)]
    pub threads: usize,
}

#[derive(Subcommand)]
pub enum Commands {
    // Print records as SAM text
    View {
        // Input file
        #[arg(group = "input", required = true, help = "Input BAM file")]
        input_file: PathBuf,

        // Output file, defaults to stdout
        #[arg(short = 'o', long = "output", required = false)]
        out_file: Option<PathBuf>,

        // Print the header text before the records
        #[arg(short = 'H', long = "header", default_value_t = false)]
        with_header: bool,

        // Verbosity
        #[arg(long = "verbose", default_value_t = false)]
        verbose: bool,
    },

    // Sort by coordinate through sorted chunks
    Sort {
        // Input file
        #[arg(group = "input", required = true, help = "Input BAM file")]
        input_file: PathBuf,

        // Output file
        #[arg(short = 'o', long = "output", required = true)]
        out_file: PathBuf,

        // Records held in memory and written per chunk
        #[arg(short = 'n', long = "batch-size", default_value_t = 500_000)]
        batch_size: usize,

        // Directory for the chunk files, defaults to the output directory
        #[arg(long = "tmp-dir", required = false)]
        tmp_dir: Option<PathBuf>,

        // DEFLATE level 0-9
        #[arg(short = 'l', long = "level", default_value_t = 6)]
        level: u32,

        // Verbosity
        #[arg(long = "verbose", default_value_t = false)]
        verbose: bool,
    },

    // Merge chunks into a single file
    Merge {
        // Input files
        #[arg(group = "input", required = true, help = "Input BAM files")]
        input_files: Vec<PathBuf>,

        // Output file
        #[arg(short = 'o', long = "output", required = true)]
        out_file: PathBuf,

        // Concatenate in input order instead of merging by coordinate
        #[arg(long = "no-sort", default_value_t = false)]
        no_sort: bool,

        // DEFLATE level 0-9
        #[arg(short = 'l', long = "level", default_value_t = 6)]
        level: u32,

        // Verbosity
        #[arg(long = "verbose", default_value_t = false)]
        verbose: bool,
    },
}
