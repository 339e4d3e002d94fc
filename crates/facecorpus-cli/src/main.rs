use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facecorpus_core::catalog::{CatalogWarning, LoadReport, PersistReport};
use facecorpus_core::vision::{
    self, FileImageLoader, NormalizedRect, VisionError, WholeFrameDetector,
};
use facecorpus_core::{spawn_batch_worker, AssetKind, CatalogError, Corpus, FaceDetector};
use image::DynamicImage;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use url::Url;

mod config;

use config::Config;

/// Exit code for storage-layer failures.
const EXIT_STORAGE_UNAVAILABLE: i32 = 2;

#[derive(Parser)]
#[command(name = "facecorpus", about = "Curate a face-recognition training corpus")]
struct Cli {
    /// Corpus root (overrides FACECORPUS_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered persons
    Persons,
    /// Create a person and its directory tree
    AddPerson { name: String },
    /// Show a person's asset lists
    Show {
        person: String,
        /// Print the entries of one list (e.g. "training-candidates")
        #[arg(short, long)]
        list: Option<AssetKind>,
    },
    /// Append references to one of a person's lists
    Add {
        person: String,
        list: AssetKind,
        #[arg(required = true)]
        references: Vec<Url>,
    },
    /// Move entries between two of a person's lists
    Move {
        person: String,
        #[arg(long)]
        from: AssetKind,
        #[arg(long)]
        to: AssetKind,
        #[arg(required = true)]
        indices: Vec<usize>,
    },
    /// Remove one entry from a person's list
    Remove {
        person: String,
        list: AssetKind,
        index: usize,
    },
    /// Crop a face out of an image file and save it as a training face
    SaveFace {
        person: String,
        image: PathBuf,
        /// Normalized face box "x,y,width,height", origin bottom-left; whole image when omitted
        #[arg(long = "box", value_parser = parse_box)]
        face_box: Option<NormalizedRect>,
    },
    /// Turn local training candidates that are already face crops into training faces
    BatchCrop { person: String },
    /// Copy a person's training faces into the global training and test sets
    Split {
        person: String,
        /// Held-out share (overrides FACECORPUS_TEST_FRACTION)
        #[arg(long)]
        fraction: Option<f64>,
        /// Seed for a reproducible split (overrides FACECORPUS_SEED)
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Rewrite a person's manifests and archive raw candidate files
    Flush { person: String },
}

fn parse_box(s: &str) -> Result<NormalizedRect, String> {
    let parts: Vec<f32> = s
        .split(',')
        .map(|p| p.trim().parse::<f32>().map_err(|e| format!("{p:?}: {e}")))
        .collect::<Result<_, _>>()?;
    let &[x, y, width, height] = parts.as_slice() else {
        return Err(format!("expected x,y,width,height, got {} values", parts.len()));
    };
    Ok(NormalizedRect { x, y, width, height })
}

/// A detector that reports boxes given on the command line.
struct GivenBoxes(Vec<NormalizedRect>);

impl FaceDetector for GivenBoxes {
    fn detect(&mut self, _: &DynamicImage) -> Result<Vec<NormalizedRect>, VisionError> {
        Ok(self.0.clone())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run(Cli::parse()).await {
        let fatal = err
            .downcast_ref::<CatalogError>()
            .is_some_and(CatalogError::is_fatal);
        if fatal {
            tracing::error!(error = %err, "storage unavailable");
            eprintln!("error: {err:#}");
            std::process::exit(EXIT_STORAGE_UNAVAILABLE);
        }
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env()?;
    if let Some(root) = cli.root {
        config.root = root;
    }
    tracing::debug!(root = %config.root.display(), "facecorpus starting");

    let mut corpus = Corpus::open(&config.root, config.settings)?;
    let json = cli.json;

    match cli.command {
        Commands::Persons => {
            let names: Vec<String> = corpus.list_persons()?.iter().map(|d| d.name()).collect();
            if json {
                println!("{}", serde_json::to_string(&names)?);
            } else if names.is_empty() {
                println!("No persons registered");
            } else {
                names.iter().for_each(|n| println!("{n}"));
            }
        }
        Commands::AddPerson { name } => {
            if corpus.create_person(&name)? {
                println!("Created {name}");
            } else {
                println!("{name} already exists");
            }
        }
        Commands::Show { person, list } => {
            let report = corpus.select_person(&person)?;
            print_load_warnings(&report);
            let catalog = corpus.catalog();
            match list {
                Some(kind) if json => {
                    println!("{}", serde_json::to_string(catalog.items(kind))?);
                }
                Some(kind) => {
                    for (i, url) in catalog.items(kind).iter().enumerate() {
                        println!("{i:>4}  {url}");
                    }
                }
                None if json => {
                    let counts: serde_json::Map<String, serde_json::Value> = AssetKind::ALL
                        .iter()
                        .map(|k| (k.label().to_string(), catalog.items(*k).len().into()))
                        .collect();
                    println!("{}", serde_json::Value::Object(counts));
                }
                None => {
                    for kind in AssetKind::ALL {
                        println!("{:<24} {}", kind.label(), catalog.items(kind).len());
                    }
                }
            }
        }
        Commands::Add {
            person,
            list,
            references,
        } => {
            require_manifest_list(list)?;
            corpus.select_person(&person)?;
            let count = references.len();
            for reference in references {
                check_reference(&reference)?;
                corpus.add_asset(list, reference)?;
            }
            let report = corpus.deselect()?;
            print_persist(report.as_ref());
            println!("Added {count} to {list}");
        }
        Commands::Move {
            person,
            from,
            to,
            indices,
        } => {
            require_manifest_list(from)?;
            require_manifest_list(to)?;
            corpus.select_person(&person)?;
            let moved = corpus.move_assets(from, to, &indices)?;
            let report = corpus.deselect()?;
            print_persist(report.as_ref());
            println!("Moved {moved} from {from} to {to}");
        }
        Commands::Remove { person, list, index } => {
            require_manifest_list(list)?;
            corpus.select_person(&person)?;
            let removed = corpus.remove_asset(list, index)?;
            let report = corpus.deselect()?;
            print_persist(report.as_ref());
            println!("Removed {removed}");
        }
        Commands::SaveFace {
            person,
            image,
            face_box,
        } => {
            let picture = vision::load_image(&image)
                .with_context(|| format!("loading {}", image.display()))?;
            let faces = match face_box {
                Some(b) => vision::crop_faces(&picture, &mut GivenBoxes(vec![b]))?,
                None => vision::crop_faces(&picture, &mut WholeFrameDetector)?,
            };
            let Some(face) = faces.first() else {
                bail!("face box is empty after clamping to the image");
            };

            corpus.select_person(&person)?;
            let saved = corpus.save_face(&face.image)?;
            println!("Saved {saved}");
        }
        Commands::BatchCrop { person } => {
            corpus.select_person(&person)?;
            let candidates = corpus.catalog().items(AssetKind::TrainingCandidates).to_vec();
            if candidates.is_empty() {
                println!("No training candidates for {person}");
                return Ok(());
            }

            let worker = spawn_batch_worker(FileImageLoader, WholeFrameDetector)?;
            let outcome = worker.crop_batch(candidates).await?;
            for skipped in &outcome.skipped {
                tracing::warn!(
                    reference = %skipped.reference,
                    reason = ?skipped.reason,
                    "not cropped"
                );
            }
            let skipped = outcome.skipped.len();

            let applied = corpus.apply_batch(outcome)?;
            for (reference, err) in &applied.failed {
                tracing::warn!(%reference, error = %err, "face not saved");
            }
            let report = corpus.deselect()?;
            print_persist(report.as_ref());
            println!(
                "Saved {} faces ({} skipped, {} failed)",
                applied.saved.len(),
                skipped,
                applied.failed.len()
            );
        }
        Commands::Split {
            person,
            fraction,
            seed,
        } => {
            let fraction = fraction.unwrap_or(config.settings.test_fraction);
            corpus.select_person(&person)?;
            let summary = match seed.or(config.seed) {
                Some(seed) => corpus.catalog().split_into_training_set(
                    corpus.registry(),
                    &person,
                    fraction,
                    &mut StdRng::seed_from_u64(seed),
                )?,
                None => corpus.catalog().split_into_training_set(
                    corpus.registry(),
                    &person,
                    fraction,
                    &mut rand::thread_rng(),
                )?,
            };
            if json {
                println!("{}", serde_json::to_string(&summary)?);
            } else {
                println!(
                    "{person}: {} training faces, {} test faces",
                    summary.training, summary.test
                );
            }
        }
        Commands::Flush { person } => {
            let load = corpus.select_person(&person)?;
            print_load_warnings(&load);
            let report = corpus.deselect()?;
            print_persist(report.as_ref());
            if let Some(report) = report {
                println!("Flushed {person}; archived {} candidate files", report.archived.len());
            }
        }
    }

    Ok(())
}

fn require_manifest_list(kind: AssetKind) -> Result<()> {
    if !kind.is_manifest_backed() {
        bail!("{kind} mirrors a folder; edit the files there instead");
    }
    Ok(())
}

fn check_reference(url: &Url) -> Result<()> {
    if facecorpus_core::manifest::parse_reference(url.as_str()).is_none() {
        bail!("unsupported reference {url}: only http, https and file URLs are kept");
    }
    Ok(())
}

fn print_warnings(warnings: &[CatalogWarning]) {
    for w in warnings {
        eprintln!("warning: {w}");
    }
}

fn print_load_warnings(report: &LoadReport) {
    if let Some(flushed) = &report.flushed {
        print_warnings(&flushed.warnings);
    }
    print_warnings(&report.warnings);
}

fn print_persist(report: Option<&PersistReport>) {
    if let Some(report) = report {
        print_warnings(&report.warnings);
    }
}
