use bingo_index::error::{Error, Result};
use bingo_index::fingerprint;
use bingo_index::index::Database;
use bingo_index::matcher::{Matcher, MatcherKind, QueryData};

use clap::Parser;
use log::info;
use rand::prelude::*;
use std::path::Path;
use std::time::Instant;

#[derive(Parser, Debug)] #[command(author, version, about, long_about = None)]
struct Args {

    //Database directory
    #[arg(short, long)]
    directory: String,

    //Matcher kind: sub, sim, topn, exact, formula, enum
    #[arg(short, long)]
    kind: String,

    //Query fingerprint as hex; random when absent
    #[arg(short, long)]
    fingerprint: Option<String>,

    //Structural hash for exact search
    #[arg(long)]
    hash: Option<u32>,

    //Gross formula for formula search
    #[arg(long)]
    formula: Option<String>,

    #[arg(long, default_value_t = 0.7)]
    min: f64,

    #[arg(long, default_value_t = 1.0)]
    max: f64,

    //Number of hits for topn
    #[arg(short, long, default_value_t = 10)]
    limit: usize,

    //Matcher options, e.g. "tversky 0.3 0.7;part:1/4"
    #[arg(short, long, default_value = "")]
    options: String,

    //Stop after this many hits
    #[arg(long)]
    max_hits: Option<usize>,
}

fn main() {

    env_logger::init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn query_fingerprint(args: &Args, size: usize) -> Result<Vec<u8>> {
    match &args.fingerprint {
        Some(hex) => fingerprint::from_hex(hex),
        None => {
            let density = rand::thread_rng().gen_range(0.05..0.3);
            Ok(fingerprint::random(size, density))
        },
    }
}

fn query_data(args: &Args, db: &Database) -> Result<QueryData> {

    let params = db.read().fp_params();
    let kind: MatcherKind = args.kind.parse()?;

    let query = match kind {
        MatcherKind::Substructure => QueryData::Substructure { fp: query_fingerprint(args, params.sub_size)? },
        MatcherKind::Similarity => QueryData::Similarity {
            fp: query_fingerprint(args, params.sim_size)?,
            min: args.min,
            max: args.max,
        },
        MatcherKind::TopN => QueryData::TopN {
            fp: query_fingerprint(args, params.sim_size)?,
            limit: args.limit,
            min: args.min,
        },
        MatcherKind::Exact => QueryData::Exact {
            hash: args.hash.ok_or_else(|| Error::InvalidParameter("exact search needs --hash".to_string()))?,
        },
        MatcherKind::Formula => QueryData::Formula {
            formula: args.formula.clone().ok_or_else(|| Error::InvalidParameter("formula search needs --formula".to_string()))?,
        },
        MatcherKind::Enumerate => QueryData::Enumerate,
    };

    return Ok(query);
}

fn print_hit(matcher: &Matcher) -> Result<()> {

    let cf = matcher.current_cf()?;
    let hit = serde_json::json!({
        "id": matcher.current_id()?,
        "similarity": matcher.current_similarity_value().ok(),
        "record": String::from_utf8_lossy(&cf),
    });
    println!("{}", hit);

    return Ok(());
}

fn run(args: &Args) -> Result<()> {

    let db = Database::load(Path::new(&args.directory), None, "read_only:true")?;
    info!("opened {} with {} objects", args.directory, db.object_count());

    let query = query_data(args, &db)?;
    let mut matcher = db.create_matcher(&args.kind, query, &args.options)?;

    let start = Instant::now();
    let mut hits = 0;

    while matcher.next()? {
        print_hit(&matcher)?;
        hits += 1;

        if args.max_hits.map(|max| hits >= max).unwrap_or(false) {
            let remaining = matcher.estimate_remaining_results_count();
            let time = matcher.estimate_remaining_time();
            info!("stopping after {} hits; about {:.0} ± {:.0} more in {:.3} ± {:.3}s",
                  hits, remaining.value, remaining.error, time.value, time.error);
            break;
        }
    }

    let duration = start.elapsed();
    info!("{} {}: {} hits in {}s", &args.directory, &args.kind, hits, duration.as_secs_f64());

    if let Ok(cells) = matcher.cells_count() {
        info!("cells {}, containers {}, searched cells {:?}..={:?}",
              cells, matcher.containers_count()?, matcher.min_cell()?, matcher.max_cell()?);
    }

    matcher.close();

    return Ok(());
}
