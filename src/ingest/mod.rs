/// Data ingestion for the flow status service.
///
/// Submodules:
/// - `feed`     - bulk station readings document: decoding, latest values
///                and per-site history series.
/// - `fixtures` (test only) - representative feed payloads.

pub mod feed;

#[cfg(test)]
pub(crate) mod fixtures;
