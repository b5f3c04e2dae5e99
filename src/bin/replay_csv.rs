use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use mcerebro::classifier::{ClassLabels, WindowClassifier};
use mcerebro::config::load_config;
use mcerebro::csv_loader::{load_samples_from_csv, replay_into};
use mcerebro::logging::init_logging;
use mcerebro::onnx_scorer::OnnxScorer;
use mcerebro::window_buffer::WindowBuffer;

struct ReplayOptions {
    dump_windows: bool,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<(PathBuf, ReplayOptions)> {
    let mut dump_windows = false;
    let mut config = None;
    let mut csv_path: Option<PathBuf> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dump-windows" => dump_windows = true,
            "--config" => {
                config = Some(PathBuf::from(
                    args.next().ok_or_else(|| anyhow!("--config requiere una ruta"))?,
                ))
            }
            _ => {
                if csv_path.is_some() {
                    bail!("Uso: replay_csv [--dump-windows] [--config mcerebro.toml] <grabacion.csv>");
                }
                csv_path = Some(PathBuf::from(arg));
            }
        }
    }

    let csv_path = csv_path.ok_or_else(|| anyhow!("Debes especificar un archivo CSV"))?;
    Ok((
        csv_path,
        ReplayOptions {
            dump_windows,
            config,
        },
    ))
}

fn main() -> Result<()> {
    let (csv_path, opts) = parse_args()?;
    let config = load_config(opts.config.as_deref())?;
    init_logging(&config.log_level)?;

    let samples = load_samples_from_csv(&csv_path)?;
    println!("Reproduciendo {} muestras desde {:?}", samples.len(), csv_path);

    let mut buffer = WindowBuffer::new(
        config.channels.iter().map(|c| c.name.clone()),
        config.window.n_samples,
        config.window.channel_capacity,
    );
    let windows = replay_into(&mut buffer, &samples);
    println!("{} ventanas producidas", windows.len());

    let scorer = OnnxScorer::new(&config.model.path)?;
    let input_name = config
        .model
        .input_name
        .clone()
        .unwrap_or_else(|| scorer.input_name().to_string());
    let output_name = config
        .model
        .output_name
        .clone()
        .unwrap_or_else(|| scorer.output_name().to_string());
    let mut classifier = WindowClassifier::new(
        scorer,
        config.window.n_samples,
        config.num_channels(),
        config.model.output_size,
    )
    .with_tensor_names(input_name, output_name);
    if let Some(labels_path) = &config.model.labels {
        classifier = classifier.with_labels(ClassLabels::load(labels_path)?);
    }

    for (timestamp, window) in &windows {
        if opts.dump_windows {
            println!("\nVentana @ {} ms ({} valores):", timestamp, window.len());
            for (idx, value) in window.as_slice().iter().enumerate() {
                println!("  {:03}: {:>12.6}", idx, value);
            }
        }

        let result = classifier.classify(Some(window))?;
        let probs = result.probabilities();
        match classifier.top_label(&result) {
            Some((label, score)) => println!(
                "{:>10} ms  {:<20} {:>6.2}%  {:?}",
                timestamp,
                label,
                score * 100.0,
                probs.as_slice()
            ),
            None => println!("{:>10} ms  {:?}", timestamp, probs.as_slice()),
        }
    }

    Ok(())
}
