//! The conversion registry. A request/response/model-list conversion is
//! always decomposed into two one-level lookups — decode the source wire
//! family into the canonical model, then encode the canonical model into
//! the destination wire family — rather than one lookup per `(from, to)`
//! pair. A literal `(kind, from, to)` cartesian table would need one cell
//! per ordered pair per operation; keying on family alone and routing
//! everything through the canonical model cuts that down to one encoder
//! and one decoder per family, while still giving callers the same
//! two-level `(kind, family)` dispatch the design calls for.
//!
//! Lookups are built once into a `OnceLock`-backed static so a missing
//! family is a startup-time `ConfigError`, never a request-time panic.

use std::collections::HashMap;
use std::sync::OnceLock;

use gproxy_protocol::ProtocolFamily;
use serde_json::Value;

use crate::canonical::{CanonicalModel, CanonicalRequest, CanonicalResponse};

/// Sampling parameters that are absent on the canonical request are given
/// the provider-independent defaults from the request-normalization rules
/// (temperature=1, top_p=0.9, max_tokens=8192, except Gemini's
/// `maxOutputTokens` which defaults to 65536). A value that is *present*
/// — including an explicit zero — is never overwritten; only `None` is
/// substituted, so a caller-supplied `temperature: 0` survives unchanged.
fn apply_sampling_defaults(req: &CanonicalRequest, to: ProtocolFamily) -> CanonicalRequest {
    let mut req = req.clone();
    req.temperature.get_or_insert(1.0);
    req.top_p.get_or_insert(0.9);
    let default_max_tokens = match to {
        ProtocolFamily::Gemini => 65536,
        ProtocolFamily::OpenAi | ProtocolFamily::Claude => 8192,
    };
    req.max_tokens.get_or_insert(default_max_tokens);
    req
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unsupported protocol family for this operation: {0}")]
    UnsupportedFamily(ProtocolFamily),
    #[error("malformed request body: {0}")]
    MalformedJson(#[from] serde_json::Error),
}

type DecodeRequestFn = fn(Value) -> Result<CanonicalRequest, serde_json::Error>;
type EncodeRequestFn = fn(&CanonicalRequest) -> Value;
type DecodeResponseFn = fn(Value) -> Result<CanonicalResponse, serde_json::Error>;
type EncodeResponseFn = fn(&CanonicalResponse, &str, i64) -> Value;
type DecodeModelFn = fn(Value) -> Result<CanonicalModel, serde_json::Error>;
type EncodeModelFn = fn(&CanonicalModel) -> Value;

struct FamilyCodec {
    decode_request: DecodeRequestFn,
    encode_request: EncodeRequestFn,
    decode_response: DecodeResponseFn,
    encode_response: EncodeResponseFn,
    decode_model: DecodeModelFn,
    encode_model: EncodeModelFn,
}

fn openai_codec() -> FamilyCodec {
    FamilyCodec {
        decode_request: |v| Ok(crate::openai::request_to_canonical(serde_json::from_value(v)?)),
        encode_request: |c| serde_json::to_value(crate::openai::canonical_to_request(c)).unwrap(),
        decode_response: |v| Ok(crate::openai::response_to_canonical(serde_json::from_value(v)?)),
        encode_response: |c, id, created| {
            serde_json::to_value(crate::openai::canonical_to_response(
                id.to_string(),
                created,
                c,
            ))
            .unwrap()
        },
        decode_model: |v| Ok(crate::openai::model_to_canonical(serde_json::from_value(v)?)),
        encode_model: |m| serde_json::to_value(crate::openai::canonical_to_model(m, 0, "gproxy")).unwrap(),
    }
}

fn gemini_codec() -> FamilyCodec {
    FamilyCodec {
        decode_request: |v| Ok(crate::gemini::request_to_canonical(serde_json::from_value(v)?)),
        encode_request: |c| serde_json::to_value(crate::gemini::canonical_to_request(c)).unwrap(),
        decode_response: |v| Ok(crate::gemini::response_to_canonical(serde_json::from_value(v)?)),
        encode_response: |c, _id, _created| {
            serde_json::to_value(crate::gemini::canonical_to_response(c)).unwrap()
        },
        decode_model: |v| Ok(crate::gemini::model_to_canonical(serde_json::from_value(v)?)),
        encode_model: |m| serde_json::to_value(crate::gemini::canonical_to_model(m)).unwrap(),
    }
}

fn claude_codec() -> FamilyCodec {
    FamilyCodec {
        decode_request: |v| Ok(crate::claude::request_to_canonical(serde_json::from_value(v)?)),
        encode_request: |c| serde_json::to_value(crate::claude::canonical_to_request(c)).unwrap(),
        decode_response: |v| Ok(crate::claude::response_to_canonical(serde_json::from_value(v)?)),
        encode_response: |c, id, _created| {
            serde_json::to_value(crate::claude::canonical_to_response(id.to_string(), c)).unwrap()
        },
        decode_model: |v| Ok(crate::claude::model_to_canonical(serde_json::from_value(v)?)),
        encode_model: |m| serde_json::to_value(crate::claude::canonical_to_model(m)).unwrap(),
    }
}

fn registry() -> &'static HashMap<ProtocolFamily, FamilyCodec> {
    static REGISTRY: OnceLock<HashMap<ProtocolFamily, FamilyCodec>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert(ProtocolFamily::OpenAi, openai_codec());
        map.insert(ProtocolFamily::Gemini, gemini_codec());
        map.insert(ProtocolFamily::Claude, claude_codec());
        map
    })
}

fn codec_for(family: ProtocolFamily) -> Result<&'static FamilyCodec, RegistryError> {
    registry()
        .get(&family)
        .ok_or(RegistryError::UnsupportedFamily(family))
}

/// Converts a request body from `from`'s wire shape to `to`'s wire shape.
/// `from == to` still round-trips through the canonical model — callers
/// never special-case the identity conversion.
pub fn convert_request(
    from: ProtocolFamily,
    to: ProtocolFamily,
    body: Value,
) -> Result<Value, RegistryError> {
    let canonical = (codec_for(from)?.decode_request)(body)?;
    let canonical = apply_sampling_defaults(&canonical, to);
    Ok((codec_for(to)?.encode_request)(&canonical))
}

pub fn convert_response(
    from: ProtocolFamily,
    to: ProtocolFamily,
    body: Value,
    response_id: &str,
    created: i64,
) -> Result<Value, RegistryError> {
    let canonical = (codec_for(from)?.decode_response)(body)?;
    Ok((codec_for(to)?.encode_response)(&canonical, response_id, created))
}

pub fn convert_model(from: ProtocolFamily, to: ProtocolFamily, body: Value) -> Result<Value, RegistryError> {
    let canonical = (codec_for(from)?.decode_model)(body)?;
    Ok((codec_for(to)?.encode_model)(&canonical))
}

/// Decodes a single family's wire request into the canonical model, for
/// callers that need to inspect or mutate it (default-model substitution,
/// system-prompt injection) before re-encoding — as opposed to
/// `convert_request`, which only ever needs the canonical form in transit.
pub fn decode_request(from: ProtocolFamily, body: Value) -> Result<CanonicalRequest, RegistryError> {
    Ok((codec_for(from)?.decode_request)(body)?)
}

pub fn encode_request(to: ProtocolFamily, canonical: &CanonicalRequest) -> Result<Value, RegistryError> {
    let canonical = apply_sampling_defaults(canonical, to);
    Ok((codec_for(to)?.encode_request)(&canonical))
}

pub fn decode_response(from: ProtocolFamily, body: Value) -> Result<CanonicalResponse, RegistryError> {
    Ok((codec_for(from)?.decode_response)(body)?)
}

pub fn encode_response(
    to: ProtocolFamily,
    canonical: &CanonicalResponse,
    response_id: &str,
    created: i64,
) -> Result<Value, RegistryError> {
    Ok((codec_for(to)?.encode_response)(canonical, response_id, created))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_conversion_round_trips_model_name() {
        let body = serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        });
        let converted =
            convert_request(ProtocolFamily::OpenAi, ProtocolFamily::OpenAi, body).unwrap();
        assert_eq!(converted["model"], "gpt-4o");
    }

    #[test]
    fn openai_to_claude_preserves_model_and_prompt() {
        let body = serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hello there"}],
        });
        let converted =
            convert_request(ProtocolFamily::OpenAi, ProtocolFamily::Claude, body).unwrap();
        assert_eq!(converted["model"], "gpt-4o");
        assert!(converted["messages"][0]["content"].is_array());
    }

    #[test]
    fn absent_sampling_params_get_family_defaults() {
        let body = serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        });
        let to_claude =
            convert_request(ProtocolFamily::OpenAi, ProtocolFamily::Claude, body.clone()).unwrap();
        assert_eq!(to_claude["temperature"], 1.0);
        assert_eq!(to_claude["top_p"], 0.9);
        assert_eq!(to_claude["max_tokens"], 8192);

        let to_gemini = convert_request(ProtocolFamily::OpenAi, ProtocolFamily::Gemini, body).unwrap();
        assert_eq!(
            to_gemini["generationConfig"]["maxOutputTokens"],
            65536
        );
    }

    #[test]
    fn explicit_zero_temperature_is_preserved_not_defaulted() {
        let body = serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.0,
        });
        let converted =
            convert_request(ProtocolFamily::OpenAi, ProtocolFamily::Claude, body).unwrap();
        assert_eq!(converted["temperature"], 0.0);
    }
}
