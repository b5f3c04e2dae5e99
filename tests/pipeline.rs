use std::time::Duration;

use mcerebro::classifier::{ClassLabels, ClassifierError, ScoringError, ScoringFunction, WindowClassifier};
use mcerebro::config::PipelineConfig;
use mcerebro::frame_queue::Push;
use mcerebro::pipeline::{ClassificationEvent, Pipeline, PipelineError};

const CONFIG: &str = r#"
[window]
n_samples = 30
channel_capacity = 30

[stream]
window_queue_capacity = 64

[[devices]]
name = "wrist"
layout = "accel_gyro"

[[devices]]
name = "ankle"
layout = "accel_gyro_led"

[[channels]]
name = "x"
device = "wrist"
signal = "accel_x"

[[channels]]
name = "y"
device = "wrist"
signal = "accel_y"

[[channels]]
name = "z"
device = "wrist"
signal = "accel_z"
"#;

/// Devuelve siempre la misma distribución; puede fallar a propósito
struct FixedScorer {
    fail: bool,
    fed_len: usize,
}

impl ScoringFunction for FixedScorer {
    fn feed(&mut self, _input: &str, data: &[f32], shape: &[usize]) -> Result<(), ScoringError> {
        assert_eq!(shape, &[1, 1, 30, 3]);
        self.fed_len = data.len();
        Ok(())
    }

    fn run(&mut self, _outputs: &[&str]) -> Result<(), ScoringError> {
        if self.fail {
            Err(ScoringError::new("inferencia caída"))
        } else {
            Ok(())
        }
    }

    fn fetch(&mut self, _output: &str, result: &mut [f32]) -> Result<(), ScoringError> {
        assert_eq!(self.fed_len, 90);
        result.copy_from_slice(&[0.2, 0.7, 0.1]);
        Ok(())
    }
}

fn frame(seq: u16, az: i16) -> Vec<u8> {
    let mut frame = vec![0u8; 20];
    frame[4..6].copy_from_slice(&az.to_be_bytes());
    frame[18..20].copy_from_slice(&seq.to_be_bytes());
    frame
}

fn pipeline(fail: bool) -> Pipeline {
    let config = PipelineConfig::from_toml_str(CONFIG).unwrap();
    let labels = ClassLabels::new(vec!["still".into(), "walking".into(), "running".into()]);
    let classifier = WindowClassifier::new(FixedScorer { fail, fed_len: 0 }, 30, 3, 3)
        .with_labels(labels);
    Pipeline::new(&config, classifier)
}

fn collect(pipeline: &Pipeline, count: usize) -> Vec<ClassificationEvent> {
    (0..count)
        .map(|i| {
            pipeline
                .events()
                .recv_timeout(Duration::from_secs(5))
                .unwrap_or_else(|_| panic!("evento {} no recibido", i))
        })
        .collect()
}

#[test]
fn sliding_windows_from_raw_frames() {
    let mut pipeline = pipeline(false);
    let frames = pipeline.attach("wrist").unwrap();

    // 30 tramas completan la primera ventana; cada trama extra produce otra
    for seq in 0..35u16 {
        frames.push(frame(seq, 8192));
    }

    let events = collect(&pipeline, 6);
    let mut last_ts = i64::MIN;
    for event in &events {
        let classification = event.result.as_ref().unwrap();
        assert!(classification.is_ready());
        assert_eq!(classification.probabilities().as_slice(), &[0.2, 0.7, 0.1]);
        assert!(event.timestamp > last_ts);
        last_ts = event.timestamp;
    }
    // Marcas reconstruidas a 25 Hz
    assert_eq!(events[5].timestamp - events[0].timestamp, 5 * 40);
    assert!(pipeline
        .events()
        .recv_timeout(Duration::from_millis(200))
        .is_err());

    assert_eq!(pipeline.buffered_samples(), 87);

    let stats = pipeline.shutdown();
    let wrist = stats["wrist"];
    assert_eq!(wrist.frames, 35);
    assert_eq!(wrist.malformed, 0);
    assert_eq!(wrist.samples, 105);
    assert_eq!(wrist.windows, 6);
}

#[test]
fn malformed_frame_leaves_buffer_untouched() {
    let mut pipeline = pipeline(false);
    let frames = pipeline.attach("wrist").unwrap();

    frames.push(frame(0, 0));
    frames.push(vec![0u8; 19]);

    let stats = pipeline.detach("wrist").unwrap();
    assert_eq!(stats.frames, 2);
    assert_eq!(stats.malformed, 1);
    assert_eq!(pipeline.buffered_samples(), 3);
}

#[test]
fn scoring_failure_reaches_the_caller() {
    let mut pipeline = pipeline(true);
    let frames = pipeline.attach("wrist").unwrap();
    for seq in 0..30u16 {
        frames.push(frame(seq, 0));
    }

    let events = collect(&pipeline, 1);
    assert!(matches!(events[0].result, Err(ClassifierError::Scoring(_))));
}

#[test]
fn detaching_one_device_keeps_the_other() {
    let mut pipeline = pipeline(false);
    let wrist = pipeline.attach("wrist").unwrap();
    let ankle = pipeline.attach("ankle").unwrap();

    assert!(pipeline.attach("wrist").is_err());
    assert!(pipeline.attach("hip").is_err());

    ankle.push(vec![0u8; 20]);
    let ankle_stats = pipeline.detach("ankle").unwrap();
    assert_eq!(ankle_stats.frames, 1);
    // Sin canales ligados al tobillo
    assert_eq!(ankle_stats.samples, 0);

    for seq in 0..30u16 {
        wrist.push(frame(seq, 0));
    }
    let events = collect(&pipeline, 1);
    assert!(events[0].result.is_ok());
    assert!(pipeline.detach("ankle").is_err());
}

#[test]
fn detach_closes_the_device_queue() {
    let mut pipeline = pipeline(false);
    let wrist = pipeline.attach("wrist").unwrap();
    assert_eq!(wrist.push(frame(0, 0)), Push::Queued);

    let stats = pipeline.detach("wrist").unwrap();
    assert_eq!(stats.frames, 1);

    assert!(wrist.is_closed());
    for seq in 1..10u16 {
        assert_eq!(wrist.push(frame(seq, 0)), Push::Closed);
    }
    // El cierre no se cuenta como desbordamiento
    assert_eq!(wrist.dropped(), 0);
    assert_eq!(pipeline.buffered_samples(), 3);
}

struct PanickingScorer;

impl ScoringFunction for PanickingScorer {
    fn feed(&mut self, _input: &str, _data: &[f32], _shape: &[usize]) -> Result<(), ScoringError> {
        Ok(())
    }

    fn run(&mut self, _outputs: &[&str]) -> Result<(), ScoringError> {
        panic!("modelo roto");
    }

    fn fetch(&mut self, _output: &str, _result: &mut [f32]) -> Result<(), ScoringError> {
        Ok(())
    }
}

#[test]
fn attach_after_classification_lane_stopped_is_rejected() {
    let config = PipelineConfig::from_toml_str(CONFIG).unwrap();
    let mut pipeline = Pipeline::new(&config, WindowClassifier::new(PanickingScorer, 30, 3, 3));
    let wrist = pipeline.attach("wrist").unwrap();
    for seq in 0..30u16 {
        wrist.push(frame(seq, 0));
    }

    // El carril de clasificación muere y cierra el canal de eventos
    assert!(matches!(
        pipeline.events().recv_timeout(Duration::from_secs(5)),
        Err(crossbeam_channel::RecvTimeoutError::Disconnected)
    ));
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !pipeline.classification_stopped() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(pipeline.classification_stopped());
    assert_eq!(pipeline.attach("ankle").unwrap_err(), PipelineError::ShutDown);
}
