//! Built-in node models

pub mod iaf_neuron;
pub mod iaf_psc_delta_canon;
pub mod lin_rate;
pub mod spike_generator;

pub use iaf_neuron::IafNeuron;
pub use iaf_psc_delta_canon::IafPscDeltaCanon;
pub use lin_rate::LinRateNeuron;
pub use spike_generator::SpikeGenerator;
