// Text-generation boundary
//
// The real generation backend is an external collaborator; the server only
// needs something that opens a fragment stream for a prompt. The simulated
// generator below chunks a canned draft with a small latency per fragment,
// which is enough to exercise both routing paths end to end.

use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use genrelay_core::FragmentStream;

/// Opens a lazily-produced fragment stream for a prompt
///
/// Implementations must not block the calling task; heavy work belongs in
/// the stream itself.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn open_stream(&self, prompt: &str) -> Result<FragmentStream, String>;
}

/// Configuration for the simulated generator
#[derive(Debug, Clone)]
pub struct SimulatedGeneratorConfig {
    /// Characters per emitted fragment
    pub chunk_size: usize,
    /// Latency between fragments
    pub chunk_delay: Duration,
}

impl Default for SimulatedGeneratorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16,
            chunk_delay: Duration::from_millis(30),
        }
    }
}

/// Fake generation backend producing a chunked canned draft
pub struct SimulatedGenerator {
    config: SimulatedGeneratorConfig,
}

impl SimulatedGenerator {
    pub fn new(config: SimulatedGeneratorConfig) -> Self {
        Self { config }
    }

    /// Fast variant for tests: no latency between fragments
    #[cfg(test)]
    pub fn instant() -> Self {
        Self::new(SimulatedGeneratorConfig {
            chunk_delay: Duration::ZERO,
            ..Default::default()
        })
    }
}

impl Default for SimulatedGenerator {
    fn default() -> Self {
        Self::new(SimulatedGeneratorConfig::default())
    }
}

#[async_trait]
impl TextGenerator for SimulatedGenerator {
    async fn open_stream(&self, prompt: &str) -> Result<FragmentStream, String> {
        let text = format!(
            "Here is a draft for \"{prompt}\". It opens with a hook, develops \
             the idea in two or three short paragraphs, and closes with a call \
             to action. Adjust the tone as needed before publishing."
        );

        let chunk_size = self.config.chunk_size.max(1);
        let chars: Vec<char> = text.chars().collect();
        let fragments: Vec<String> = chars
            .chunks(chunk_size)
            .map(|chunk| chunk.iter().collect())
            .collect();

        let delay = self.config.chunk_delay;
        let stream = stream::iter(fragments.into_iter().map(Ok)).then(move |fragment| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            fragment
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_generator_chunks_in_order() {
        let generator = SimulatedGenerator::instant();
        let mut stream = generator.open_stream("spring outfits").await.unwrap();

        let mut joined = String::new();
        let mut count = 0;
        while let Some(fragment) = stream.next().await {
            joined.push_str(&fragment.unwrap());
            count += 1;
        }

        assert!(count > 1);
        assert!(joined.contains("spring outfits"));
        assert!(joined.starts_with("Here is a draft"));
    }
}
