use bingo_index::config::IndexConfig;
use bingo_index::error::{Error, Result};
use bingo_index::fingerprint::{self, FingerprintParams};
use bingo_index::index::Database;
use bingo_index::object::PrecomputedObject;

use clap::Parser;
use glob::glob;
use kdam::tqdm;
use log::{info, warn};
use rand::prelude::*;
use std::fs::File;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};


// Returns an Iterator to the Reader of the lines of the file.
fn read_lines<P>(filename: P) -> io::Result<io::Lines<io::BufReader<File>>>
where P: AsRef<Path>, {
    let file = File::open(filename)?;
    Ok(io::BufReader::new(file).lines())
}

#[derive(Parser, Debug)] #[command(author, version, about, long_about = None)]
struct Args {

    //Which task to carry out: build_from_files or build_random
    #[arg(short, long)]
    task: String,

    //Glob of input files, one object per line: <sub hex> <sim hex> [hash [formula [record]]]
    #[arg(short, long)]
    input: Option<String>,

    //Database directory to create
    #[arg(short, long)]
    output_dirname: String,

    //YAML index config
    #[arg(short, long)]
    config: Option<PathBuf>,

    //Create options, e.g. "mt_size:1000;segment_size:64"
    #[arg(long, default_value = "")]
    options: String,

    #[arg(long, default_value_t = 216)]
    sub_size: usize,

    #[arg(long, default_value_t = 8)]
    sim_size: usize,

    #[arg(long, default_value = "molecule")]
    base_type: String,

    //Number of objects if task is build_random
    #[arg(short, long)]
    num_records: Option<usize>,
}

fn main() {

    env_logger::init();

    let args = Args::parse();

    let result = match args.task.as_str() {
        "build_from_files" => build_from_files(&args),
        "build_random" => build_random(&args),
        _ => Err(Error::InvalidParameter(format!("unknown task: {}", args.task))),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn create_database(args: &Args) -> Result<Database> {

    let mut config = match &args.config {
        Some(path) => IndexConfig::from_file(path)?,
        None => IndexConfig::default(),
    };
    config.apply_create_options(&args.options)?;

    let params = FingerprintParams::new(args.sub_size, args.sim_size);
    info!("creating {} database in {} with {:?}", args.base_type, args.output_dirname, params);

    return Database::create(Path::new(&args.output_dirname), params, &args.base_type, config);
}

fn build_from_files(args: &Args) -> Result<()> {

    let pattern = args.input.as_ref()
        .ok_or_else(|| Error::InvalidParameter("build_from_files needs --input".to_string()))?;

    let filenames: Vec<PathBuf> = glob(pattern)
        .map_err(|e| Error::InvalidParameter(format!("bad glob '{}': {}", pattern, e)))?
        .filter_map(|entry| entry.ok())
        .collect();

    if filenames.is_empty() {
        return Err(Error::InvalidParameter(format!("no files match '{}'", pattern)));
    }

    let db = create_database(args)?;
    let mut skipped = 0;

    for filename in tqdm!(filenames.iter()) {

        info!("loading {}", filename.display());

        for line in read_lines(filename)? {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            let obj = match PrecomputedObject::from_line(&line) {
                Ok(obj) => obj,
                Err(e) => {
                    warn!("skipping line due to {}: {}", e, line);
                    skipped += 1;
                    continue;
                },
            };

            match db.add(&obj) {
                Ok(_) => {},
                Err(Error::FingerprintSize { expected, actual }) => {
                    warn!("skipping line with {} byte fingerprint, expected {}: {}", actual, expected, line);
                    skipped += 1;
                },
                Err(Error::RecordTooLarge(len)) => {
                    warn!("skipping line with a {} byte record or formula: {}", len, line);
                    skipped += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    db.optimize()?;
    info!("stored {} objects, skipped {} lines", db.object_count(), skipped);

    return db.close();
}

fn build_random(args: &Args) -> Result<()> {

    let count = args.num_records
        .ok_or_else(|| Error::InvalidParameter("build_random needs --num-records".to_string()))?;

    let db = create_database(args)?;
    let mut rng = rand::thread_rng();

    for i in tqdm!(0..count) {
        let density = rng.gen_range(0.05..0.5);
        let obj = PrecomputedObject {
            sub_fp: fingerprint::random_with(&mut rng, args.sub_size, density),
            sim_fp: fingerprint::random_with(&mut rng, args.sim_size, density),
            cf: format!("random-{}", i).into_bytes(),
            hash: rng.gen_range(0..1024),
            formula: format!("C{}H{}", rng.gen_range(1..30), rng.gen_range(1..60)),
        };
        db.add(&obj)?;
    }

    db.optimize()?;
    info!("stored {} random objects", db.object_count());

    return db.close();
}
