//! Carriles concurrentes: decodificación por dispositivo y clasificación.
//!
//! ```text
//! fuente BLE ──▶ LossyQueue(100) ──▶ carril del dispositivo ──┐
//! fuente BLE ──▶ LossyQueue(100) ──▶ carril del dispositivo ──┤ Mutex<WindowBuffer>
//!                                                            ▼
//!                                   LossyQueue(ventanas) ──▶ carril de clasificación ──▶ eventos
//! ```
//!
//! La inferencia nunca corre en el hilo que drena las tramas, así que una
//! inferencia lenta sólo provoca descartes en las colas acotadas.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::classifier::{Classification, ClassifierError, ScoringFunction, WindowClassifier};
use crate::config::PipelineConfig;
use crate::decoder::FrameDecoder;
use crate::frame_queue::{lossy_queue, FrameSender, LossyReceiver, LossySender, Push};
use crate::layout::FrameLayout;
use crate::timestamp::host_now_ms;
use crate::types::{Channel, RawFrame, Window};
use crate::window_buffer::{StaleChannel, WindowBuffer};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Device already attached: {0}")]
    AlreadyAttached(String),

    #[error("Device not attached: {0}")]
    NotAttached(String),

    #[error("Classification lane has stopped")]
    ShutDown,
}

/// Ventana lista junto con la marca de tiempo de la muestra que la completó
#[derive(Debug, Clone)]
pub struct TimedWindow {
    pub timestamp: i64,
    pub window: Window,
}

/// Resultado entregado por el carril de clasificación
#[derive(Debug)]
pub struct ClassificationEvent {
    pub timestamp: i64,
    pub result: Result<Classification, ClassifierError>,
}

/// Contadores de un carril de dispositivo
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub frames: u64,
    pub malformed: u64,
    pub samples: u64,
    pub windows: u64,
}

struct Shared {
    buffer: WindowBuffer,
    stale: HashSet<usize>,
}

struct DeviceLane {
    frames: FrameSender,
    shutdown: Sender<()>,
    handle: JoinHandle<DeviceStats>,
}

/// Pipeline completo con un buffer compartido por todos los dispositivos
pub struct Pipeline {
    shared: Arc<Mutex<Shared>>,
    layouts: HashMap<String, &'static FrameLayout>,
    bindings: HashMap<String, Arc<Vec<(Channel, usize)>>>,
    frame_queue_capacity: usize,
    stale_after: u64,
    window_tx: Option<LossySender<TimedWindow>>,
    lanes: HashMap<String, DeviceLane>,
    classifier: Option<JoinHandle<()>>,
    events: Receiver<ClassificationEvent>,
}

impl Pipeline {
    pub fn new<S>(config: &PipelineConfig, classifier: WindowClassifier<S>) -> Self
    where
        S: ScoringFunction + Send + 'static,
    {
        let buffer = WindowBuffer::new(
            config.channels.iter().map(|c| c.name.clone()),
            config.window.n_samples,
            config.window.channel_capacity,
        );

        let layouts = config
            .devices
            .iter()
            .map(|d| (d.name.clone(), d.layout.layout()))
            .collect();

        let mut bindings: HashMap<String, Vec<(Channel, usize)>> = HashMap::new();
        for (index, channel) in config.channels.iter().enumerate() {
            bindings
                .entry(channel.device.clone())
                .or_default()
                .push((channel.signal, index));
        }

        let (window_tx, window_rx) =
            lossy_queue::<TimedWindow>("windows", config.stream.window_queue_capacity);
        let (events_tx, events) = unbounded();
        let handle = thread::spawn(move || classification_lane(classifier, window_rx, events_tx));

        Self {
            shared: Arc::new(Mutex::new(Shared {
                buffer,
                stale: HashSet::new(),
            })),
            layouts,
            bindings: bindings
                .into_iter()
                .map(|(device, b)| (device, Arc::new(b)))
                .collect(),
            frame_queue_capacity: config.stream.frame_queue_capacity,
            stale_after: config.window.stale_after,
            window_tx: Some(window_tx),
            lanes: HashMap::new(),
            classifier: Some(handle),
            events,
        }
    }

    /// Arranca el carril de un dispositivo y devuelve dónde empujar sus tramas
    pub fn attach(&mut self, device: &str) -> Result<FrameSender, PipelineError> {
        if self.lanes.contains_key(device) {
            return Err(PipelineError::AlreadyAttached(device.to_string()));
        }
        let layout = *self
            .layouts
            .get(device)
            .ok_or_else(|| PipelineError::UnknownDevice(device.to_string()))?;
        let window_tx = match &self.window_tx {
            Some(tx) if !tx.is_closed() => tx.clone(),
            _ => return Err(PipelineError::ShutDown),
        };

        let bindings = self
            .bindings
            .get(device)
            .cloned()
            .unwrap_or_default();

        let (frames, frames_rx) = lossy_queue::<RawFrame>(device, self.frame_queue_capacity);
        let (shutdown, shutdown_rx) = bounded::<()>(1);

        let lane = DeviceContext {
            name: device.to_string(),
            decoder: FrameDecoder::new(layout),
            bindings,
            shared: Arc::clone(&self.shared),
            window_tx,
            stale_after: self.stale_after,
            stats: DeviceStats::default(),
        };
        let handle = thread::spawn(move || lane.run(frames_rx, shutdown_rx));

        info!(device, layout = layout.name, "Dispositivo conectado al pipeline");
        self.lanes.insert(
            device.to_string(),
            DeviceLane {
                frames: frames.clone(),
                shutdown,
                handle,
            },
        );
        Ok(frames)
    }

    /// Detiene el carril de un dispositivo sin tocar los demás canales.
    ///
    /// Las tramas ya encoladas se procesan antes de parar; después la cola
    /// queda cerrada y el productor recibe `Push::Closed`. Las muestras del
    /// dispositivo que quedan en el buffer no se borran.
    pub fn detach(&mut self, device: &str) -> Result<DeviceStats, PipelineError> {
        let lane = self
            .lanes
            .remove(device)
            .ok_or_else(|| PipelineError::NotAttached(device.to_string()))?;

        let _ = lane.shutdown.send(());
        drop(lane.frames);
        let stats = lane.handle.join().unwrap_or_default();
        info!(device, ?stats, "Dispositivo desconectado del pipeline");
        Ok(stats)
    }

    /// Resultados de clasificación
    pub fn events(&self) -> &Receiver<ClassificationEvent> {
        &self.events
    }

    pub fn stale_channels(&self) -> Vec<StaleChannel> {
        self.shared.lock().buffer.stale_channels(self.stale_after)
    }

    pub fn buffered_samples(&self) -> usize {
        self.shared.lock().buffer.total()
    }

    /// Tramas descartadas por desbordamiento en la cola de un dispositivo
    pub fn frames_dropped(&self, device: &str) -> Option<u64> {
        self.lanes.get(device).map(|lane| lane.frames.dropped())
    }

    /// El carril de clasificación terminó (por `shutdown` o porque falló)
    pub fn classification_stopped(&self) -> bool {
        self.window_tx.as_ref().map_or(true, |tx| tx.is_closed())
    }

    pub fn windows_dropped(&self) -> u64 {
        self.window_tx.as_ref().map_or(0, |tx| tx.dropped())
    }

    /// Para todos los carriles y espera a que termine la clasificación en curso
    pub fn shutdown(mut self) -> HashMap<String, DeviceStats> {
        let devices: Vec<String> = self.lanes.keys().cloned().collect();
        let mut stats = HashMap::new();
        for device in devices {
            if let Ok(s) = self.detach(&device) {
                stats.insert(device, s);
            }
        }

        self.window_tx = None;
        if let Some(handle) = self.classifier.take() {
            let _ = handle.join();
        }
        stats
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        for lane in self.lanes.values() {
            let _ = lane.shutdown.try_send(());
        }
    }
}

struct DeviceContext {
    name: String,
    decoder: FrameDecoder,
    bindings: Arc<Vec<(Channel, usize)>>,
    shared: Arc<Mutex<Shared>>,
    window_tx: LossySender<TimedWindow>,
    stale_after: u64,
    stats: DeviceStats,
}

impl DeviceContext {
    fn run(mut self, frames: LossyReceiver<RawFrame>, shutdown: Receiver<()>) -> DeviceStats {
        let rx: &Receiver<RawFrame> = &frames;
        loop {
            select! {
                recv(rx) -> msg => match msg {
                    Ok(frame) => self.process(&frame),
                    Err(_) => break,
                },
                recv(shutdown) -> _ => {
                    // Lo ya encolado se procesa; lo que llegue después no
                    let pending: Vec<RawFrame> = rx.try_iter().collect();
                    for frame in pending {
                        self.process(&frame);
                    }
                    break;
                }
            }
        }
        debug!(device = %self.name, "Carril de dispositivo terminado");
        self.stats
    }

    fn process(&mut self, frame: &[u8]) {
        self.stats.frames += 1;

        let decoded = match self.decoder.decode(frame, host_now_ms()) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.malformed += 1;
                warn!(device = %self.name, error = %e, "Trama descartada");
                return;
            }
        };

        let mut ready = Vec::new();
        let newly_stale;
        {
            let mut shared = self.shared.lock();
            for sample in &decoded.samples {
                for &(signal, index) in self.bindings.iter() {
                    if signal != sample.channel {
                        continue;
                    }
                    self.stats.samples += 1;
                    if let Some(window) = shared.buffer.push(index, sample.value) {
                        ready.push(TimedWindow {
                            timestamp: sample.timestamp,
                            window,
                        });
                    }
                }
            }

            let stale = shared.buffer.stale_channels(self.stale_after);
            let current: HashSet<usize> = stale.iter().map(|s| s.index).collect();
            newly_stale = stale
                .into_iter()
                .filter(|s| !shared.stale.contains(&s.index))
                .collect::<Vec<_>>();
            for recovered in shared.stale.difference(&current) {
                info!(channel = recovered, "Canal recuperado");
            }
            shared.stale = current;
        }

        for s in newly_stale {
            warn!(channel = %s.name, missed = s.missed, "Canal sin datos nuevos");
        }

        for window in ready {
            self.stats.windows += 1;
            if self.window_tx.push(window) == Push::Closed {
                warn!(device = %self.name, "Carril de clasificación detenido, ventana perdida");
            }
        }
    }
}

fn classification_lane<S: ScoringFunction>(
    mut classifier: WindowClassifier<S>,
    windows: LossyReceiver<TimedWindow>,
    events: Sender<ClassificationEvent>,
) {
    while let Ok(TimedWindow { timestamp, window }) = windows.recv() {
        let result = classifier.classify(Some(&window));
        match &result {
            Ok(classification) => {
                if let Some((label, score)) = classifier.top_label(classification) {
                    debug!(timestamp, label, score, "Clasificación");
                }
            }
            Err(e) => error!(timestamp, error = %e, "Clasificación fallida"),
        }

        if events.send(ClassificationEvent { timestamp, result }).is_err() {
            break;
        }
    }
    debug!("Carril de clasificación terminado");
}
