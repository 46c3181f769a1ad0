//! Construction of scheduler and memory components from configuration.

pub mod pool_builder;

pub use pool_builder::{
    build_arena, build_object_pool, build_pool, build_scheduler, build_schedulers,
};
