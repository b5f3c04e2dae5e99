/*
Clasificación en tiempo real de sensores MotionSense vía BLE + ONNX

1. Recibe tramas crudas de cada dispositivo configurado (BlueZ)
2. Decodifica y reconstruye marcas de tiempo por número de secuencia
3. Acumula en la ventana deslizante multi-canal
4. Clasifica cada ventana en un hilo dedicado

Para compilar y ejecutar:
     cargo build --release --features bluez,onnx
     ./target/release/mcerebro mcerebro.toml
*/

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use mcerebro::ble::start_ble_receiver;
use mcerebro::classifier::{ClassLabels, WindowClassifier};
use mcerebro::config::load_config;
use mcerebro::logging::init_logging;
use mcerebro::onnx_scorer::OnnxScorer;
use mcerebro::pipeline::Pipeline;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path.as_deref()).context("Configuración inválida")?;
    init_logging(&config.log_level)?;

    info!(
        n_samples = config.window.n_samples,
        channels = config.num_channels(),
        capacity = config.window.channel_capacity,
        output_size = config.model.output_size,
        "Configuración cargada"
    );

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
        let labels = ClassLabels::load(labels_path)?;
        info!(labels = ?labels.as_slice(), "Clases cargadas");
        classifier = classifier.with_labels(labels);
    }
    let labels = classifier.labels().cloned();

    let mut pipeline = Pipeline::new(&config, classifier);
    let running = Arc::new(AtomicBool::new(true));

    for device in &config.devices {
        let Some(address) = device.address.clone() else {
            warn!(device = %device.name, "Dispositivo sin dirección BLE, se omite");
            continue;
        };

        let frames = pipeline.attach(&device.name)?;
        let characteristic = device.characteristic.clone();
        let running = Arc::clone(&running);
        let name = device.name.clone();

        std::thread::spawn(move || {
            if let Err(e) = start_ble_receiver(&address, &characteristic, frames, running) {
                error!(device = %name, error = %e, "Error en BLE");
            }
        });
    }

    info!("Iniciando clasificación en tiempo real");

    let mut last_stats = Instant::now();
    loop {
        match pipeline.events().recv_timeout(Duration::from_secs(1)) {
            Ok(event) => match event.result {
                Ok(classification) => {
                    let probs = classification.probabilities();
                    let best = probs.top().map(|(idx, score)| {
                        let label = labels
                            .as_ref()
                            .and_then(|l| l.get(idx))
                            .map(str::to_string)
                            .unwrap_or_else(|| idx.to_string());
                        (label, score)
                    });
                    if let Some((label, score)) = best {
                        info!(
                            timestamp = event.timestamp,
                            label = %label,
                            confidence = score,
                            probabilities = ?probs.as_slice(),
                            "Clasificación"
                        );
                    }
                }
                Err(e) => error!(timestamp = event.timestamp, error = %e, "Error clasificando"),
            },
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            last_stats = Instant::now();
            for device in &config.devices {
                if let Some(dropped) = pipeline.frames_dropped(&device.name) {
                    info!(device = %device.name, dropped, "Tramas descartadas");
                }
            }
            info!(
                buffered = pipeline.buffered_samples(),
                windows_dropped = pipeline.windows_dropped(),
                "Estado del pipeline"
            );
        }
    }

    running.store(false, Ordering::Relaxed);
    pipeline.shutdown();
    Ok(())
}
