//! Build and inspect persisted frequency models.
//!
//! Usage:
//!   cargo run -p build_model -- build counts.txt more.txt --output data/frequency_model.dat
//!   cargo run -p build_model -- inspect data/frequency_model.dat --top 20

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use wordpredict_core::{Config, FrequencyModel};

#[derive(Parser, Debug)]
#[command(name = "build_model")]
#[command(about = "Build and inspect word frequency models")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seed a model from frequency lists and save it
    Build {
        /// Text files with lines `w1 [w2 [w3]]<TAB>count`
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Where to write the model
        #[arg(short, long)]
        output: PathBuf,

        /// Optional config.toml with model parameters
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Prune unigrams below the configured floor before saving
        #[arg(long)]
        prune: bool,
    },
    /// Print statistics and the most frequent words of a saved model
    Inspect {
        model: PathBuf,

        /// How many top words to list
        #[arg(long, default_value_t = 20)]
        top: usize,
    },
}

/// Accepts lines like
/// `<token1> <token2> <token3>\t<count>` or `<token1> <count>`.
fn parse_line(line: &str) -> Option<(Vec<String>, u64)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (words, count) = match line.rfind('\t') {
        Some(pos) => (&line[..pos], &line[pos + 1..]),
        None => line.rsplit_once(char::is_whitespace)?,
    };
    let count = count.trim().parse::<u64>().ok()?;
    let tokens: Vec<String> = words.split_whitespace().map(str::to_string).collect();
    if tokens.is_empty() || tokens.len() > 3 {
        return None;
    }
    Some((tokens, count))
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load_toml(p)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", p.display(), e)),
        None => Ok(Config::default()),
    }
}

fn build(inputs: &[PathBuf], output: &Path, config: Option<&Path>, prune: bool) -> Result<()> {
    let cfg = load_config(config)?;
    let model = FrequencyModel::new(&cfg);

    let mut accepted = 0usize;
    let mut skipped = 0usize;
    for path in inputs {
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        for line in BufReader::new(f).lines() {
            let line = line.with_context(|| format!("read {}", path.display()))?;
            match parse_line(&line) {
                Some((tokens, count)) => {
                    model.insert_count(&tokens, count);
                    accepted += 1;
                }
                None if line.trim().is_empty() || line.trim_start().starts_with('#') => {}
                None => skipped += 1,
            }
        }
    }

    if prune {
        let removed = model.prune();
        eprintln!("pruned {removed} unigrams");
    }

    model
        .save_to(output)
        .with_context(|| format!("write {}", output.display()))?;

    let stats = model.statistics();
    eprintln!(
        "wrote {} ({} entries read, {} malformed lines skipped; {} unigrams, {} bigrams, {} trigrams)",
        output.display(),
        accepted,
        skipped,
        stats.unique_unigrams,
        stats.unique_bigrams,
        stats.unique_trigrams
    );
    Ok(())
}

fn inspect(path: &Path, top: usize) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("no model at {}", path.display());
    }
    let model = FrequencyModel::default();
    model
        .load_from(path)
        .with_context(|| format!("load {}", path.display()))?;

    println!("{}", serde_json::to_string_pretty(&model.statistics())?);
    for (word, p) in model.get_top_words::<&str>(top, &[]) {
        println!("{word}\t{p:.6}");
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wordpredict_core=info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::Build {
            inputs,
            output,
            config,
            prune,
        } => build(&inputs, &output, config.as_deref(), prune),
        Command::Inspect { model, top } => inspect(&model, top),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tab_and_space_separated_lines() {
        assert_eq!(
            parse_line("the cat\t12"),
            Some((vec!["the".to_string(), "cat".to_string()], 12))
        );
        assert_eq!(parse_line("hello 7"), Some((vec!["hello".to_string()], 7)));
        assert_eq!(parse_line("# comment"), None);
        assert_eq!(parse_line("no-count"), None);
        assert_eq!(parse_line("a b c d 1"), None);
    }
}
