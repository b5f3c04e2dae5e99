use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::ValueType;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::classifier::{ClassifierError, ScoringError, ScoringFunction};

/// Función de scoring sobre ONNX Runtime
pub struct OnnxScorer {
    session: Session,
    input_name: String,
    prob_output_name: String,
    pending: Option<(String, Vec<usize>, Vec<f32>)>,
    outputs: HashMap<String, Vec<f32>>,
}

impl OnnxScorer {
    pub fn new(model_path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let model_path = model_path.as_ref();
        let session = Session::builder()?.commit_from_file(model_path)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or(ClassifierError::MissingIo { kind: "input" })?;

        let prob_output_name = session
            .outputs
            .iter()
            .find(|output| {
                matches!(
                    output.output_type,
                    ValueType::Tensor {
                        ty: TensorElementType::Float32,
                        ..
                    }
                )
            })
            .or_else(|| session.outputs.first())
            .map(|output| output.name.clone())
            .ok_or(ClassifierError::MissingIo { kind: "output" })?;

        info!(
            model = %model_path.display(),
            input = %input_name,
            output = %prob_output_name,
            "Modelo ONNX cargado"
        );

        Ok(Self {
            session,
            input_name,
            prob_output_name,
            pending: None,
            outputs: HashMap::new(),
        })
    }

    /// Primer tensor de entrada del grafo
    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    /// Primera salida float32 del grafo (probabilidades)
    pub fn output_name(&self) -> &str {
        &self.prob_output_name
    }
}

impl ScoringFunction for OnnxScorer {
    fn feed(&mut self, input_name: &str, data: &[f32], shape: &[usize]) -> Result<(), ScoringError> {
        self.pending = Some((input_name.to_string(), shape.to_vec(), data.to_vec()));
        Ok(())
    }

    fn run(&mut self, output_names: &[&str]) -> Result<(), ScoringError> {
        let (input_name, shape, data) = self
            .pending
            .take()
            .ok_or_else(|| ScoringError::new("run sin feed previo"))?;

        let input_value =
            ort::value::Value::from_array((shape, data)).map_err(ScoringError::new)?;

        let outputs = self
            .session
            .run(ort::inputs![
                input_name.as_str() => &input_value,
            ])
            .map_err(ScoringError::new)?;

        self.outputs.clear();
        for name in output_names {
            let Some(value) = outputs.get(*name) else {
                return Err(ScoringError::new(format!("salida {} no encontrada", name)));
            };
            let (_, prob_data) = value
                .try_extract_tensor::<f32>()
                .map_err(ScoringError::new)?;
            self.outputs.insert(name.to_string(), prob_data.to_vec());
        }
        Ok(())
    }

    fn fetch(&mut self, output_name: &str, result: &mut [f32]) -> Result<(), ScoringError> {
        let data = self
            .outputs
            .get(output_name)
            .ok_or_else(|| ScoringError::new(format!("salida {} no ejecutada", output_name)))?;
        if data.len() < result.len() {
            return Err(ScoringError::new(format!(
                "salida {} con {} valores, se esperaban {}",
                output_name,
                data.len(),
                result.len()
            )));
        }
        result.copy_from_slice(&data[..result.len()]);
        Ok(())
    }
}
