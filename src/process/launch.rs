/*!
 * Launch Token
 * Packs a worker construction request into one transport-safe
 * command-line argument: JSON -> zlib -> url-safe base64
 */

use super::types::{ProcessError, ProcessResult};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::{Map, Value};
use std::io::{Read, Write};

/// What to construct and run in the child process.
///
/// `target` names a factory in the worker registry; `args`/`kwargs` are
/// its construction arguments. `entry` selects the method invoked after
/// construction - the registry is a closed trait, so only `run` (or
/// absent, meaning `run`) is accepted by the bootstrap.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub target: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub entry: Option<String>,
    pub entry_args: Vec<Value>,
    pub entry_kwargs: Map<String, Value>,
}

impl LaunchSpec {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            entry: None,
            entry_args: Vec::new(),
            entry_kwargs: Map::new(),
        }
    }

    pub fn with_arg(mut self, arg: Value) -> Self {
        self.args.push(arg);
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }
}

type Parts = (
    String,
    Vec<Value>,
    Map<String, Value>,
    Option<String>,
    Vec<Value>,
    Map<String, Value>,
);

/// Encode a launch spec into one argv-safe token.
///
/// The compression is not about size for its own sake - it keeps the
/// whole construction request portable as a single argument.
pub fn encode_token(spec: &LaunchSpec) -> ProcessResult<String> {
    let parts: Parts = (
        spec.target.clone(),
        spec.args.clone(),
        spec.kwargs.clone(),
        spec.entry.clone(),
        spec.entry_args.clone(),
        spec.entry_kwargs.clone(),
    );
    let raw = serde_json::to_vec(&parts)
        .map_err(|e| ProcessError::BadToken(format!("serialize failed: {e}")))?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .and_then(|_| encoder.finish())
        .map(|compressed| URL_SAFE.encode(compressed))
        .map_err(|e| ProcessError::BadToken(format!("compress failed: {e}")))
}

/// Reverse [`encode_token`].
pub fn decode_token(token: &str) -> ProcessResult<LaunchSpec> {
    let compressed = URL_SAFE
        .decode(token.trim())
        .map_err(|e| ProcessError::BadToken(format!("base64 decode failed: {e}")))?;

    let mut raw = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut raw)
        .map_err(|e| ProcessError::BadToken(format!("decompress failed: {e}")))?;

    let (target, args, kwargs, entry, entry_args, entry_kwargs): Parts =
        serde_json::from_slice(&raw)
            .map_err(|e| ProcessError::BadToken(format!("malformed payload: {e}")))?;

    Ok(LaunchSpec {
        target,
        args,
        kwargs,
        entry,
        entry_args,
        entry_kwargs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_round_trip() {
        let spec = LaunchSpec::new("echo-server")
            .with_arg(json!(42))
            .with_kwarg("control_port", json!(40123))
            .with_kwarg("sleep", json!(0.05))
            .with_entry("run");

        let token = encode_token(&spec).unwrap();
        // argv-safe: no whitespace, quotes, or shell metacharacters
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=')));

        let decoded = decode_token(&token).unwrap();
        assert_eq!(decoded, spec);
    }

    #[test]
    fn garbage_token_rejected() {
        assert!(matches!(
            decode_token("not!a!token"),
            Err(ProcessError::BadToken(_))
        ));
        // valid base64 but not zlib data
        assert!(matches!(
            decode_token(&URL_SAFE.encode(b"plain bytes")),
            Err(ProcessError::BadToken(_))
        ));
    }
}
