// Valuation pipeline: projection, cluster matching, weighting, benchmarks, scoring, ranking.

pub mod benchmark;
pub mod cluster;
pub mod projection;
pub mod ranking;
pub mod roster;
pub mod scoring;
pub mod standardize;
pub mod weights;
