// Domain layer: checkout models and ports (interfaces) the core is written against.

pub mod model;
pub mod ports;
