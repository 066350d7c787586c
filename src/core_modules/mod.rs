// THEORY:
// `core_modules` holds the map perception engine, leaves first: single pixel
// heuristics, raw image operations and template scores, then the
// perspective model, grid discovery, per-cell classification, multi-frame
// voting, and finally the graph search and objective filters that read the
// merged grid. Nothing in here touches the device; the orchestration layer
// feeds it captures and acts on what it returns.

pub mod frame_voter;
pub mod graph_search;
pub mod grid_locator;
pub mod image_ops;
pub mod node_filter;
pub mod perspective;
pub mod pixel;
pub mod template;
pub mod tile_classifier;
