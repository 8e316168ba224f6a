use serde::Serialize;

/// A domain fact that can be published on the bus.
///
/// The topic is a stable contract between producers and consumers, by
/// convention dot-separated lowercase segments such as `user.created`.
pub trait Event: Serialize + Send + Sync {
    fn topic(&self) -> &str;
}
