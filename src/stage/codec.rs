//! Codec stages: paired block encoders/decoders run as transforms.

use async_trait::async_trait;

use crate::error::StageError;
use crate::format::StreamFormat;
use crate::stage::Transform;

/// Which half of a codec a stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecDirection {
    /// Raw blocks in, coded blocks out.
    Encode,
    /// Coded blocks in, raw blocks out.
    Decode,
}

/// A block codec: both halves of an encode/decode pair.
///
/// Codecs are synchronous CPU work; the pipeline wraps them in a
/// [`CodecStage`] to run one direction as a transform. A codec that
/// buffers internally may return an empty block and flush later.
pub trait Codec: Send {
    /// Short name used in logs and events.
    fn name(&self) -> &str;

    /// Encodes one raw block.
    fn encode(&mut self, input: &[u8]) -> Result<Vec<u8>, StageError>;

    /// Decodes one coded block.
    fn decode(&mut self, input: &[u8]) -> Result<Vec<u8>, StageError>;

    /// The format the given direction produces, if known.
    fn output_format(&self, direction: CodecDirection) -> Option<StreamFormat> {
        let _ = direction;
        None
    }
}

/// Runs one direction of a [`Codec`] as a pipeline transform.
pub struct CodecStage {
    codec: Box<dyn Codec>,
    direction: CodecDirection,
}

impl CodecStage {
    /// Wraps `codec`, running the given direction.
    pub fn new(codec: Box<dyn Codec>, direction: CodecDirection) -> Self {
        Self { codec, direction }
    }
}

#[async_trait]
impl Transform for CodecStage {
    fn name(&self) -> &str {
        self.codec.name()
    }

    async fn process(&mut self, input: &[u8]) -> Result<Vec<u8>, StageError> {
        match self.direction {
            CodecDirection::Encode => self.codec.encode(input),
            CodecDirection::Decode => self.codec.decode(input),
        }
    }

    fn output_format(&self) -> Option<StreamFormat> {
        self.codec.output_format(self.direction)
    }
}

/// Codec that passes blocks through unchanged, in both directions.
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn name(&self) -> &str {
        "identity"
    }

    fn encode(&mut self, input: &[u8]) -> Result<Vec<u8>, StageError> {
        Ok(input.to_vec())
    }

    fn decode(&mut self, input: &[u8]) -> Result<Vec<u8>, StageError> {
        Ok(input.to_vec())
    }
}
