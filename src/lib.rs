//! Núcleo de clasificación de sensores MotionSense.
//!
//! Tramas BLE de longitud fija → muestras físicas con marca de tiempo
//! reconstruida → buffer de ventana deslizante multi-canal → función de
//! scoring opaca → vector de probabilidades.

pub mod classifier;
pub mod config;
pub mod csv_loader;
pub mod decoder;
pub mod frame_queue;
pub mod layout;
pub mod logging;
pub mod pipeline;
pub mod timestamp;
pub mod types;
pub mod window_buffer;

#[cfg(feature = "bluez")]
pub mod ble;

#[cfg(feature = "onnx")]
pub mod onnx_scorer;
