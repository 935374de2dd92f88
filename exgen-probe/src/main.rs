use exgen_core::corpus;
use exgen_core::model::generate_options::GenerateOptions;
use exgen_core::model::generator::ExpressionGenerator;
use exgen_core::model::search;
use exgen_core::service::DEFAULT_MAX_ORDER;
use rand::SeedableRng;
use rand::rngs::StdRng;

const USAGE: &str = "\
Usage: exgen-probe <COMMAND> --corpus <FILE.tsv> [OPTIONS]

Commands:
  generate        Generate novel expressions
  best            Search for the most probable expressions
  distribution    Print every known expression with its probability

Options:
  --corpus <FILE>     Corpus file, one `expression<TAB>weight` per line
  --order <K>         Context length, 1 to 16 (default: 3)
  --count <N>         Expressions to generate (default: 10)
  --prefix <TEXT>     Seed text for `generate`
  --exclude <REGEX>   Reject candidates matching this pattern
  --tries <N>         Failed descents before `best` stops (default: 1000)
  --limit <N>         Rows printed by `distribution` (default: all)
  --seed <N>          Seed the random generator for reproducible output
  -h, --help          Print help";

struct Args {
    command: String,
    corpus: String,
    order: usize,
    count: usize,
    prefix: Option<String>,
    exclude: Option<String>,
    tries: usize,
    limit: Option<usize>,
    seed: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args()?;

    // Build the chain straight from the file, no store or cache involved
    let entries = corpus::load_tsv(&args.corpus)?;
    let generator = ExpressionGenerator::new(&args.corpus, args.order, &entries)?;
    println!("{} expressions, {} contexts (order {})", entries.len(), generator.chain().len(), args.order);

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    match args.command.as_str() {
        "generate" => {
            let options = GenerateOptions::default()
                .with_prefix(args.prefix.as_deref())
                .with_exclude_pattern(args.exclude.as_deref())?;
            for i in 0..args.count {
                match generator.generate(&options, &mut rng) {
                    Some(expression) => {
                        println!("{}: {} ({:e})", i + 1, expression, generator.probability(&expression))
                    }
                    None => println!("{}: no novel expression after {} attempts", i + 1, options.max_attempts),
                }
            }
        }
        "best" => {
            // Each line beats the previous one
            for (expression, probability) in search::best_probability(generator.chain(), args.tries, rng) {
                println!("{:e}\t{}", probability, expression);
            }
        }
        "distribution" => {
            let distribution = generator.probability_distribution();
            let limit = args.limit.unwrap_or(distribution.len());
            for (expression, probability) in distribution.into_iter().take(limit) {
                println!("{:e}\t{}", probability, expression);
            }
        }
        other => return Err(format!("unknown command '{other}'\n\n{USAGE}").into()),
    }

    Ok(())
}

fn parse_args() -> Result<Args, Box<dyn std::error::Error>> {
    let mut command = None;
    let mut corpus = None;
    let mut args = Args {
        command: String::new(),
        corpus: String::new(),
        order: 3,
        count: 10,
        prefix: None,
        exclude: None,
        tries: 1000,
        limit: None,
        seed: None,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| iter.next().ok_or_else(|| format!("{name} requires a value"));
        match arg.as_str() {
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            "--corpus" => corpus = Some(value("--corpus")?),
            "--order" => args.order = value("--order")?.parse()?,
            "--count" => args.count = value("--count")?.parse()?,
            "--prefix" => args.prefix = Some(value("--prefix")?),
            "--exclude" => args.exclude = Some(value("--exclude")?),
            "--tries" => args.tries = value("--tries")?.parse()?,
            "--limit" => args.limit = Some(value("--limit")?.parse()?),
            "--seed" => args.seed = Some(value("--seed")?.parse()?),
            other if other.starts_with('-') => return Err(format!("unknown option '{other}'").into()),
            other if command.is_none() => command = Some(other.to_owned()),
            other => return Err(format!("unexpected argument '{other}'").into()),
        }
    }

    args.command = command.ok_or_else(|| format!("missing command\n\n{USAGE}"))?;
    args.corpus = corpus.ok_or_else(|| format!("--corpus is required\n\n{USAGE}"))?;
    if args.order < 1 || args.order > DEFAULT_MAX_ORDER {
        return Err(format!("--order must be between 1 and {DEFAULT_MAX_ORDER}").into());
    }
    Ok(args)
}
