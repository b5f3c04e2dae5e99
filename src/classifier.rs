use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error};

use crate::types::{ProbabilityVector, Window};

/// Error devuelto por una función de scoring externa
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ScoringError {
    message: String,
}

impl ScoringError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Fallo en la función de scoring: {0}")]
    Scoring(#[from] ScoringError),

    #[cfg(feature = "onnx")]
    #[error("ONNX Runtime error: {0}")]
    OnnxError(#[from] ort::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid window size: expected {expected}, got {actual}")]
    InvalidWindowSize { expected: usize, actual: usize },

    #[error("Missing model {kind}")]
    MissingIo { kind: &'static str },
}

/// Capacidad mínima que se exige al modelo: cargar, ejecutar y leer tensores
pub trait ScoringFunction {
    fn feed(&mut self, input_name: &str, data: &[f32], shape: &[usize]) -> Result<(), ScoringError>;

    fn run(&mut self, output_names: &[&str]) -> Result<(), ScoringError>;

    fn fetch(&mut self, output_name: &str, result: &mut [f32]) -> Result<(), ScoringError>;
}

impl<S: ScoringFunction + ?Sized> ScoringFunction for Box<S> {
    fn feed(&mut self, input_name: &str, data: &[f32], shape: &[usize]) -> Result<(), ScoringError> {
        (**self).feed(input_name, data, shape)
    }

    fn run(&mut self, output_names: &[&str]) -> Result<(), ScoringError> {
        (**self).run(output_names)
    }

    fn fetch(&mut self, output_name: &str, result: &mut [f32]) -> Result<(), ScoringError> {
        (**self).fetch(output_name, result)
    }
}

/// Resultado de una llamada a `classify`
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Aún no hay ventana: vector a ceros del tamaño de salida
    Pending(ProbabilityVector),
    Ready(ProbabilityVector),
}

impl Classification {
    pub fn probabilities(&self) -> &ProbabilityVector {
        match self {
            Classification::Pending(p) | Classification::Ready(p) => p,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Classification::Ready(_))
    }
}

#[derive(Debug, Deserialize)]
struct ClassesJson {
    index_to_class: HashMap<String, String>,
}

/// Etiquetas del modelo en el orden de sus salidas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabels(Vec<String>);

impl ClassLabels {
    pub fn new(labels: Vec<String>) -> Self {
        Self(labels)
    }

    /// Carga `{"index_to_class": {"0": "...", ...}}`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ClassifierError> {
        let data: ClassesJson = serde_json::from_str(content)?;

        // Convertir HashMap a Vec ordenado por índice
        let mut pairs: Vec<(usize, String)> = data
            .index_to_class
            .into_iter()
            .filter_map(|(k, v)| k.parse::<usize>().ok().map(|idx| (idx, v)))
            .collect();

        pairs.sort_by_key(|(idx, _)| *idx);
        Ok(Self(pairs.into_iter().map(|(_, name)| name).collect()))
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// Adaptador entre la ventana aplanada y la función de scoring.
///
/// La ventana se entrega tal cual (bloques por canal) con forma
/// `[1, 1, n_samples, num_channels]`. No se reordena ni se renormaliza la
/// salida.
pub struct WindowClassifier<S> {
    scorer: S,
    input_name: String,
    output_name: String,
    n_samples: usize,
    num_channels: usize,
    output_size: usize,
    labels: Option<ClassLabels>,
}

impl<S: ScoringFunction> WindowClassifier<S> {
    pub fn new(scorer: S, n_samples: usize, num_channels: usize, output_size: usize) -> Self {
        Self {
            scorer,
            input_name: "input".to_string(),
            output_name: "output".to_string(),
            n_samples,
            num_channels,
            output_size,
            labels: None,
        }
    }

    pub fn with_tensor_names(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.input_name = input.into();
        self.output_name = output.into();
        self
    }

    pub fn with_labels(mut self, labels: ClassLabels) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn input_shape(&self) -> [usize; 4] {
        [1, 1, self.n_samples, self.num_channels]
    }

    pub fn labels(&self) -> Option<&ClassLabels> {
        self.labels.as_ref()
    }

    /// Clasifica una ventana; sin ventana devuelve el vector a ceros pendiente
    pub fn classify(&mut self, window: Option<&Window>) -> Result<Classification, ClassifierError> {
        let Some(window) = window else {
            return Ok(Classification::Pending(ProbabilityVector::zeros(self.output_size)));
        };

        let expected = self.n_samples * self.num_channels;
        if window.len() != expected {
            return Err(ClassifierError::InvalidWindowSize {
                expected,
                actual: window.len(),
            });
        }

        let shape = self.input_shape();
        let mut result = vec![0.0f32; self.output_size];

        let scored = self
            .scorer
            .feed(&self.input_name, window.as_slice(), &shape)
            .and_then(|_| self.scorer.run(&[self.output_name.as_str()]))
            .and_then(|_| self.scorer.fetch(&self.output_name, &mut result));

        if let Err(e) = scored {
            error!(error = %e, "La función de scoring falló");
            return Err(e.into());
        }

        debug!(probabilities = ?result, "Ventana clasificada");
        Ok(Classification::Ready(ProbabilityVector::from(result)))
    }

    /// Etiqueta y puntuación de la clase ganadora
    pub fn top_label(&self, classification: &Classification) -> Option<(&str, f32)> {
        if !classification.is_ready() {
            return None;
        }
        let (idx, score) = classification.probabilities().top()?;
        let label = self.labels.as_ref()?.get(idx)?;
        Some((label, score))
    }

    pub fn into_scorer(self) -> S {
        self.scorer
    }
}
