//! amplicon - command-line interface to the amplicon-stats library.

use amplicon_stats::data::{AbundanceTable, CountMatrix, Metadata, Orientation, PhyloTree, Taxonomy};
use amplicon_stats::diversity::{AlphaTable, DistanceMatrix, DistanceMetric, Pcoa};
use amplicon_stats::error::Result;
use amplicon_stats::filter::PrevalenceFilter;
use amplicon_stats::pipeline::{run_battery, BatteryConfig};
use amplicon_stats::report::{Column, Order, SummaryTable};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Amplicon community statistics
#[derive(Parser)]
#[command(name = "amplicon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Input tables shared by every analysis command.
#[derive(Args)]
struct Inputs {
    /// Count matrix TSV
    #[arg(short = 'c', long)]
    counts: PathBuf,

    /// Sample metadata TSV
    #[arg(short, long)]
    metadata: PathBuf,

    /// Taxonomy TSV (taxa are unassigned if omitted)
    #[arg(short, long)]
    taxonomy: Option<PathBuf>,

    /// Newick tree with one tip per taxon
    #[arg(long)]
    tree: Option<PathBuf>,

    /// Samples are rows in the count matrix
    #[arg(long)]
    samples_as_rows: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMetric {
    BrayCurtis,
    BrayCurtisRelative,
    Jaccard,
    Euclidean,
}

impl From<CliMetric> for DistanceMetric {
    fn from(metric: CliMetric) -> Self {
        match metric {
            CliMetric::BrayCurtis => DistanceMetric::BrayCurtis,
            CliMetric::BrayCurtisRelative => DistanceMetric::BrayCurtisRelative,
            CliMetric::Jaccard => DistanceMetric::Jaccard,
            CliMetric::Euclidean => DistanceMetric::Euclidean,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Prevalence-filter a count table
    Filter {
        #[command(flatten)]
        inputs: Inputs,

        /// Minimum prevalence as a fraction of samples
        #[arg(long, default_value = "0.02")]
        threshold: f64,

        /// Drop phyla with fewer passing taxa than this
        #[arg(long, default_value = "2")]
        min_taxa_per_phylum: usize,

        /// Output path for the filtered counts TSV
        #[arg(short, long)]
        output: PathBuf,

        /// Output path for the prevalence table TSV
        #[arg(long)]
        prevalence: Option<PathBuf>,
    },

    /// Alpha diversity per sample
    Alpha {
        #[command(flatten)]
        inputs: Inputs,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Distance matrix and PCoA coordinates
    Beta {
        #[command(flatten)]
        inputs: Inputs,

        #[arg(long, value_enum, default_value = "bray-curtis")]
        metric: CliMetric,

        /// Number of ordination axes
        #[arg(long, default_value = "2")]
        axes: usize,

        /// Output path for the distance matrix TSV
        #[arg(short, long)]
        output: PathBuf,

        /// Output path for PCoA coordinates TSV
        #[arg(long)]
        coordinates: Option<PathBuf>,
    },

    /// Run a test battery from a YAML or JSON configuration
    Battery {
        #[command(flatten)]
        inputs: Inputs,

        /// Battery configuration
        #[arg(long)]
        config: PathBuf,

        /// Output path for the summary CSV
        #[arg(short, long)]
        output: PathBuf,

        /// Also write the summary as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Directory for per-contrast differential abundance tables
        #[arg(long)]
        da_dir: Option<PathBuf>,

        /// Override the permutation count of the configuration
        #[arg(long)]
        permutations: Option<usize>,

        /// Override the seed of the configuration
        #[arg(long)]
        seed: Option<u64>,

        /// Print rows with |effect size| at least this large, largest first
        #[arg(long)]
        min_effect: Option<f64>,
    },

    /// Write the standard battery configuration
    Example {
        /// Output path (.yaml or .json)
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Filter {
            inputs,
            threshold,
            min_taxa_per_phylum,
            output,
            prevalence,
        } => cmd_filter(
            &inputs,
            threshold,
            min_taxa_per_phylum,
            &output,
            prevalence.as_deref(),
        ),

        Commands::Alpha { inputs, output } => cmd_alpha(&inputs, &output),

        Commands::Beta {
            inputs,
            metric,
            axes,
            output,
            coordinates,
        } => cmd_beta(&inputs, metric.into(), axes, &output, coordinates.as_deref()),

        Commands::Battery {
            inputs,
            config,
            output,
            json,
            da_dir,
            permutations,
            seed,
            min_effect,
        } => cmd_battery(
            &inputs,
            &config,
            &output,
            json.as_deref(),
            da_dir.as_deref(),
            permutations,
            seed,
            min_effect,
        ),

        Commands::Example { output } => cmd_example(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_table(inputs: &Inputs) -> Result<AbundanceTable> {
    let orientation = if inputs.samples_as_rows {
        Orientation::SamplesAsRows
    } else {
        Orientation::TaxaAsRows
    };
    let counts = CountMatrix::from_tsv_with(&inputs.counts, orientation)?;
    let mut metadata = Metadata::from_tsv(&inputs.metadata)?;
    if metadata.has_column("depth") && !metadata.has_column("depth_group") {
        metadata = metadata.with_depth_group()?;
    }
    let taxonomy = match &inputs.taxonomy {
        Some(path) => Taxonomy::from_tsv(path)?,
        None => Taxonomy::unassigned(counts.taxon_ids()),
    };
    let tree = match &inputs.tree {
        Some(path) => Some(PhyloTree::from_newick_file(path)?),
        None => None,
    };

    eprintln!(
        "Loaded {} taxa x {} samples",
        counts.n_taxa(),
        counts.n_samples()
    );
    AbundanceTable::new(counts, taxonomy, tree, metadata)
}

fn cmd_filter(
    inputs: &Inputs,
    threshold: f64,
    min_taxa_per_phylum: usize,
    output: &Path,
    prevalence: Option<&Path>,
) -> Result<()> {
    let table = load_table(inputs)?;
    let outcome = PrevalenceFilter::new(threshold, min_taxa_per_phylum)?.apply(&table)?;
    eprint!("{}", outcome);

    outcome.table.counts().to_tsv(output)?;
    if let Some(path) = prevalence {
        outcome.prevalence.to_tsv(path)?;
    }
    eprintln!("Wrote {:?}", output);
    Ok(())
}

fn cmd_alpha(inputs: &Inputs, output: &Path) -> Result<()> {
    let table = load_table(inputs)?;
    let alpha = AlphaTable::compute_all(&table)?;
    alpha.to_tsv(output)?;
    eprintln!("Wrote alpha diversity for {} samples to {:?}", alpha.n_samples(), output);
    Ok(())
}

fn cmd_beta(
    inputs: &Inputs,
    metric: DistanceMetric,
    axes: usize,
    output: &Path,
    coordinates: Option<&Path>,
) -> Result<()> {
    let table = load_table(inputs)?;
    let dm = DistanceMatrix::compute(&table, metric)?;
    dm.to_tsv(output)?;
    eprintln!("Wrote {} distances to {:?}", metric.name(), output);

    if let Some(path) = coordinates {
        let pcoa = Pcoa::compute(&dm, axes)?;
        pcoa.to_tsv(path)?;
        for (k, pct) in pcoa.percent_explained.iter().take(pcoa.n_axes()).enumerate() {
            eprintln!("  Axis.{}: {:.1}%", k + 1, pct);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_battery(
    inputs: &Inputs,
    config_path: &Path,
    output: &Path,
    json: Option<&Path>,
    da_dir: Option<&Path>,
    permutations: Option<usize>,
    seed: Option<u64>,
    min_effect: Option<f64>,
) -> Result<()> {
    eprintln!("Loading battery configuration from {:?}...", config_path);
    let mut config = BatteryConfig::from_file(config_path)?;
    if let Some(n) = permutations {
        config.n_permutations = n;
    }
    if let Some(s) = seed {
        config.seed = s;
    }

    let table = load_table(inputs)?;
    eprintln!(
        "Running {} tests with {} permutations...",
        config.tests.len(),
        config.n_permutations
    );
    let report = run_battery(&table, &config)?;
    eprintln!(
        "Filter kept {} of {} taxa",
        report.filter.taxa_after, report.filter.taxa_before
    );

    let summary = SummaryTable::from_report(&report);
    summary.to_csv(output)?;
    info!(rows = summary.len(), "summary written");
    if let Some(path) = json {
        std::fs::write(path, summary.to_json()?)?;
    }

    if let Some(dir) = da_dir {
        std::fs::create_dir_all(dir)?;
        for set in report.da_results() {
            let name = format!(
                "da_{}_{}_vs_{}.tsv",
                set.contrast.factor, set.contrast.numerator, set.contrast.denominator
            );
            set.to_tsv(dir.join(name))?;
        }
    }

    let failed: Vec<_> = report.failures().collect();
    eprintln!(
        "Done! {} tests recorded, {} failed",
        report.runs.len() - failed.len(),
        failed.len()
    );
    for run in failed {
        eprintln!("  failed: {}", run.spec);
    }

    if let Some(min) = min_effect {
        let rows = summary
            .query()
            .min_effect(min)
            .sort_by(Column::EffectSize, Order::Descending)
            .rows();
        println!("test\tfactors\tterm\teffect_size\tp_value");
        for r in rows {
            println!(
                "{}\t{}\t{}\t{:.4}\t{}",
                r.test,
                r.factors,
                r.term.as_deref().unwrap_or(""),
                r.effect_size.unwrap_or_default(),
                r.p_value.map(|p| format!("{:.4}", p)).unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn cmd_example(output: &Path) -> Result<()> {
    let config = BatteryConfig::example();
    let text = match output.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::to_string_pretty(&config)?,
        _ => config.to_yaml()?,
    };
    std::fs::write(output, text)?;
    eprintln!("Wrote {} tests to {:?}", config.tests.len(), output);
    Ok(())
}
