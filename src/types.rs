use serde::Deserialize;
use std::fmt;

/// Longitud fija de una trama MotionSense
pub const FRAME_LEN: usize = 20;

/// Constantes por defecto del clasificador
pub const DEFAULT_N_SAMPLES: usize = 30;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 30;
pub const DEFAULT_OUTPUT_SIZE: usize = 3;
pub const DEFAULT_FRAME_QUEUE_CAPACITY: usize = 100;

/// Trama binaria tal como llega de la característica BLE
pub type RawFrame = Vec<u8>;

/// Señal escalar producida por el decodificador
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    AccelX,
    AccelY,
    AccelZ,
    GyroX,
    GyroY,
    GyroZ,
    MagX,
    MagY,
    MagZ,
    Led1,
    Led2,
    Led3,
    Sequence,
    /// Byte crudo en la posición indicada (canal de diagnóstico)
    Raw(u8),
}

impl Channel {
    pub const ACCEL: [Channel; 3] = [Channel::AccelX, Channel::AccelY, Channel::AccelZ];
    pub const GYRO: [Channel; 3] = [Channel::GyroX, Channel::GyroY, Channel::GyroZ];
    pub const MAG: [Channel; 3] = [Channel::MagX, Channel::MagY, Channel::MagZ];
    pub const LED: [Channel; 3] = [Channel::Led1, Channel::Led2, Channel::Led3];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::AccelX => write!(f, "accel_x"),
            Channel::AccelY => write!(f, "accel_y"),
            Channel::AccelZ => write!(f, "accel_z"),
            Channel::GyroX => write!(f, "gyro_x"),
            Channel::GyroY => write!(f, "gyro_y"),
            Channel::GyroZ => write!(f, "gyro_z"),
            Channel::MagX => write!(f, "mag_x"),
            Channel::MagY => write!(f, "mag_y"),
            Channel::MagZ => write!(f, "mag_z"),
            Channel::Led1 => write!(f, "led_1"),
            Channel::Led2 => write!(f, "led_2"),
            Channel::Led3 => write!(f, "led_3"),
            Channel::Sequence => write!(f, "sequence"),
            Channel::Raw(idx) => write!(f, "raw_{}", idx),
        }
    }
}

/// Una muestra decodificada en unidades físicas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Marca de tiempo reconstruida (ms)
    pub timestamp: i64,
    pub channel: Channel,
    pub value: f32,
}

impl Sample {
    pub fn new(timestamp: i64, channel: Channel, value: f32) -> Self {
        Self {
            timestamp,
            channel,
            value,
        }
    }
}

/// Ventana aplanada lista para clasificar.
///
/// Layout: bloque completo del canal 0, luego el del canal 1, etc.,
/// en el orden declarado del buffer. Longitud = `n_samples * num_channels`.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    values: Vec<f32>,
    n_samples: usize,
    num_channels: usize,
}

impl Window {
    pub(crate) fn new(values: Vec<f32>, n_samples: usize, num_channels: usize) -> Self {
        debug_assert_eq!(values.len(), n_samples * num_channels);
        Self {
            values,
            n_samples,
            num_channels,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Bloque de valores de un canal (por índice declarado)
    pub fn channel(&self, idx: usize) -> Option<&[f32]> {
        if idx >= self.num_channels {
            return None;
        }
        let start = idx * self.n_samples;
        Some(&self.values[start..start + self.n_samples])
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }
}

/// Vector de probabilidades en el orden de etiquetas del modelo
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityVector(Vec<f32>);

impl ProbabilityVector {
    pub fn zeros(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Índice y puntuación de la clase más probable
    pub fn top(&self) -> Option<(usize, f32)> {
        self.0
            .iter()
            .copied()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for ProbabilityVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}
