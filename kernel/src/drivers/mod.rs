//! Device drivers. Everything here sits on the virtio-mmio transport;
//! the UART lives in khal because the console needs it before drivers
//! exist.

pub mod virtio;
