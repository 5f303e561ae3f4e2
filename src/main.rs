//! Command-line driver for collecting gestures, training and testing.

use std::io::Write;
use std::path::{Path, PathBuf};

use gesturelab::app_dirs::AppPaths;
use gesturelab::config::{self, Settings};
use gesturelab::detector::{HandDetector, JsonlDetector};
use gesturelab::fs_ops::write_atomic;
use gesturelab::logging;
use gesturelab::session::{SessionController, SessionError, SessionEvent, run_detection};
use gesturelab::storage::SqliteStore;

fn main() {
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Summary,
    Export(PathBuf),
    Import(PathBuf),
    ExportCsv(PathBuf),
    ImportCsv(PathBuf),
    Clear,
    Train,
    Describe,
    ExportModel(Option<PathBuf>),
    Collect {
        label: String,
        frames: PathBuf,
        target: Option<usize>,
    },
    Save,
    Test(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
struct CliOptions {
    command: Command,
    database: Option<PathBuf>,
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    let mut settings = config::load_or_default().map_err(|err| err.to_string())?;
    if let Some(database) = options.database {
        settings.storage.database_path = Some(database);
    }
    // Replacing commands must work even when the stored dataset is unreadable.
    let restore = !matches!(
        options.command,
        Command::Clear | Command::Import(_) | Command::ImportCsv(_)
    );
    let mut controller = open_controller(settings, restore)?;
    match options.command {
        Command::Summary => print_summary(&controller),
        Command::Export(path) => {
            let document = controller.export_document().map_err(|err| err.to_string())?;
            write_file(&path, &document)?;
            println!("Exported dataset to {}", path.display());
        }
        Command::Import(path) => {
            let document = read_file(&path)?;
            controller
                .import_document(&document)
                .map_err(|err| err.to_string())?;
            print_summary(&controller);
        }
        Command::ExportCsv(path) => {
            write_file(&path, &controller.export_csv())?;
            println!("Exported dataset to {}", path.display());
        }
        Command::ImportCsv(path) => {
            let text = read_file(&path)?;
            controller.import_csv(&text).map_err(|err| err.to_string())?;
            print_summary(&controller);
        }
        Command::Clear => {
            controller.clear_dataset().map_err(|err| err.to_string())?;
            println!("Dataset cleared");
        }
        Command::Train => train(&mut controller)?,
        Command::Describe => println!("{}", controller.describe_model()),
        Command::ExportModel(dir) => {
            let dir = match dir {
                Some(dir) => dir,
                None => AppPaths::resolve()
                    .and_then(|paths| paths.exports_dir())
                    .map_err(|err| err.to_string())?,
            };
            let path = controller
                .export_model(&dir)
                .map_err(|err| err.to_string())?;
            println!("Exported model to {}", path.display());
        }
        Command::Collect {
            label,
            frames,
            target,
        } => collect(&mut controller, &label, &frames, target)?,
        Command::Save => print_events(
            &controller
                .save_pending()
                .map_err(|err| err.to_string())?
                .events,
        ),
        Command::Test(frames) => test(&mut controller, &frames)?,
    }
    Ok(())
}

fn open_controller(settings: Settings, restore: bool) -> Result<SessionController, String> {
    let path = match &settings.storage.database_path {
        Some(path) => path.clone(),
        None => AppPaths::resolve()
            .map_err(|err| err.to_string())?
            .database_file(),
    };
    let documents = SqliteStore::open(&path).map_err(|err| err.to_string())?;
    let models = SqliteStore::open(&path).map_err(|err| err.to_string())?;
    if !restore {
        return Ok(SessionController::open_unrestored(
            Box::new(documents),
            Box::new(models),
            settings,
        ));
    }
    SessionController::open(Box::new(documents), Box::new(models), settings)
        .map_err(|err| match err {
            SessionError::Parse(_) => {
                format!("{err}; run `clear` or `import` to replace the stored dataset")
            }
            other => other.to_string(),
        })
}

fn collect(
    controller: &mut SessionController,
    label: &str,
    frames: &Path,
    target: Option<usize>,
) -> Result<(), String> {
    let mut detector = JsonlDetector::open(frames).map_err(|err| err.to_string())?;
    let started = controller
        .start_collecting(label, target, detector.is_ready())
        .map_err(|err| err.to_string())?;
    print_events(&started.events);
    let stats = run_detection(controller, &mut detector, print_event)
        .map_err(|err| err.to_string())?;
    println!();
    if stats.detector_errors > 0 {
        println!("Skipped {} unreadable frames", stats.detector_errors);
    }
    // Pending samples live only as long as this process.
    let saved = controller.save_pending().map_err(|err| err.to_string())?;
    print_events(&saved.events);
    Ok(())
}

fn test(controller: &mut SessionController, frames: &Path) -> Result<(), String> {
    let mut detector = JsonlDetector::open(frames).map_err(|err| err.to_string())?;
    let started = controller
        .start_testing(detector.is_ready())
        .map_err(|err| err.to_string())?;
    print_events(&started.events);
    let stats = run_detection(controller, &mut detector, print_event)
        .map_err(|err| err.to_string())?;
    println!("Processed {} frames", stats.ticks);
    Ok(())
}

fn train(controller: &mut SessionController) -> Result<(), String> {
    let outcome = controller
        .train(|event| print_event(event))
        .map_err(|err| err.to_string())?;
    println!();
    println!(
        "Trained on {} samples across {} labels",
        outcome.samples,
        outcome.labels.len()
    );
    println!("{}", outcome.evaluation.render());
    Ok(())
}

fn print_summary(controller: &SessionController) {
    let summary = controller.summary();
    if summary.labels.is_empty() {
        println!("No samples collected yet");
    }
    for entry in &summary.labels {
        println!("{:<20} {}", entry.label, entry.count);
    }
    println!("Total: {}", summary.total);
    let classifier = controller.classifier();
    if classifier.is_trained() {
        println!("Model labels: {}", classifier.labels().join(", "));
    } else {
        println!("No trained model");
    }
}

fn print_events(events: &[SessionEvent]) {
    for event in events {
        print_event(event);
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::CollectionStarted { label, target } => {
            println!("Collecting {target} samples for {label}");
        }
        SessionEvent::SampleCollected {
            collected, target, ..
        } => {
            print!("\rCollected {collected}/{target}");
            let _ = std::io::stdout().flush();
        }
        SessionEvent::CollectionComplete { label, collected } => {
            println!("\nCollected {collected} samples for {label}");
        }
        SessionEvent::Stopped { pending } => println!("\nStopped with {pending} samples pending"),
        SessionEvent::Committed { label, total } => {
            println!("Saved samples for {label} ({total} total)");
        }
        SessionEvent::NothingToCommit => println!("Nothing to save"),
        SessionEvent::TrainingProgress {
            epoch,
            total_epochs,
            logs,
        } => {
            print!(
                "\rEpoch {}/{}  loss={:.4}  accuracy={:.3}",
                epoch + 1,
                total_epochs,
                logs.loss,
                logs.accuracy
            );
            let _ = std::io::stdout().flush();
        }
        SessionEvent::TestingStarted => println!("Testing started"),
        SessionEvent::Prediction(prediction) => {
            let detail = prediction
                .probabilities
                .iter()
                .map(|class| format!("{}={:.2}", class.label, class.probability))
                .collect::<Vec<_>>()
                .join("  ");
            println!(
                "{:<12} {:.2}  [{detail}]",
                prediction.label, prediction.probability
            );
        }
        SessionEvent::Announce { label, probability } => {
            println!(">> {label} ({:.0}%)", probability * 100.0);
        }
        SessionEvent::NoHand => println!("no hand"),
        SessionEvent::SampleSkipped | SessionEvent::Discarded => {}
    }
}

fn read_file(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|err| format!("Failed to read {}: {err}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<(), String> {
    write_atomic(path, contents.as_bytes())
        .map_err(|err| format!("Failed to write {}: {err}", path.display()))
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut database: Option<PathBuf> = None;
    let mut target: Option<usize> = None;
    let mut positional: Vec<String> = Vec::new();

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--db" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--db requires a value".to_string())?;
                database = Some(PathBuf::from(value));
            }
            "--target" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--target requires a value".to_string())?;
                target = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| format!("Invalid --target value: {value}"))?,
                );
            }
            flag if flag.starts_with("--") => {
                return Err(format!("Unknown argument: {flag}\n\n{}", help_text()));
            }
            value => positional.push(value.to_string()),
        }
        idx += 1;
    }

    let mut positional = positional.into_iter();
    let name = positional.next().ok_or_else(help_text)?;
    let mut path_arg = |what: &str| {
        positional
            .next()
            .map(PathBuf::from)
            .ok_or_else(|| format!("{name} requires {what}\n\n{}", help_text()))
    };
    let command = match name.as_str() {
        "summary" => Command::Summary,
        "export" => Command::Export(path_arg("a file")?),
        "import" => Command::Import(path_arg("a file")?),
        "export-csv" => Command::ExportCsv(path_arg("a file")?),
        "import-csv" => Command::ImportCsv(path_arg("a file")?),
        "clear" => Command::Clear,
        "train" => Command::Train,
        "describe" => Command::Describe,
        "export-model" => Command::ExportModel(path_arg("a directory").ok()),
        "collect" => {
            let label = path_arg("a label")?.to_string_lossy().into_owned();
            let frames = path_arg("a frames file")?;
            Command::Collect {
                label,
                frames,
                target,
            }
        }
        "save" => Command::Save,
        "test" => Command::Test(path_arg("a frames file")?),
        unknown => return Err(format!("Unknown command: {unknown}\n\n{}", help_text())),
    };
    if target.is_some() && !matches!(command, Command::Collect { .. }) {
        return Err("--target only applies to collect".to_string());
    }
    Ok(CliOptions { command, database })
}

fn help_text() -> String {
    [
        "gesturelab",
        "",
        "Collects hand-gesture samples, trains a classifier and tests it.",
        "",
        "Usage:",
        "  gesturelab [--db <file>] <command> [args]",
        "",
        "Commands:",
        "  summary                          Per-label sample counts and model status",
        "  export <file>                    Write the dataset as JSON",
        "  import <file>                    Replace the dataset from JSON",
        "  export-csv <file>                Write the dataset as CSV rows",
        "  import-csv <file>                Replace the dataset from CSV rows",
        "  clear                            Delete every collected sample",
        "  train                            Train and save a model on the dataset",
        "  describe                         Print the model architecture",
        "  export-model [dir]               Write a portable model file",
        "  collect <label> <frames.jsonl>   Collect samples from recorded frames",
        "  save                             Commit pending samples",
        "  test <frames.jsonl>              Classify recorded frames",
        "",
        "Options:",
        "  --db <file>       Database file (default: <app root>/gesturelab.db)",
        "  --target <n>      Samples to collect (default from config.toml)",
        "",
        "Frames are JSON arrays of hands, one frame per line.",
    ]
    .join("\n")
}
