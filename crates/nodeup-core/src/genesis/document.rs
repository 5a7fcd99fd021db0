//! Consensus genesis documents: extraction from RPC responses and local
//! synthesis.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{Error, Result};
use crate::identity::{PublicKey, ValidatorKey};

/// A validated genesis document borrowed from a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisDocument<'a> {
    /// Document bytes exactly as served.
    pub bytes: &'a [u8],
    /// The document's `chain_id`.
    pub chain_id: String,
}

/// `/genesis` RPC envelope: `{"result":{"genesis":<document>}}`.
#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(borrow)]
    result: EnvelopeResult<'a>,
}

#[derive(Deserialize)]
struct EnvelopeResult<'a> {
    #[serde(borrow)]
    genesis: &'a RawValue,
}

#[derive(Deserialize)]
struct ChainIdOnly {
    chain_id: String,
}

impl<'a> GenesisDocument<'a> {
    /// Accepts either a raw genesis document or an RPC envelope wrapping
    /// one. The nested document's bytes are returned untouched.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the body is not a JSON
    /// object carrying a non-empty `chain_id`.
    pub fn extract(body: &'a [u8]) -> std::result::Result<Self, String> {
        let text = std::str::from_utf8(body).map_err(|e| format!("body is not UTF-8: {e}"))?;
        let document = match serde_json::from_str::<Envelope<'_>>(text) {
            Ok(envelope) => envelope.result.genesis.get(),
            Err(_) => text,
        };
        Self::parse(document.as_bytes())
    }

    /// Validates an unwrapped document.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the document is not a
    /// JSON object carrying a non-empty `chain_id`.
    pub fn parse(document: &'a [u8]) -> std::result::Result<Self, String> {
        let object: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(document).map_err(|e| format!("not a JSON object: {e}"))?;
        let ChainIdOnly { chain_id } =
            serde_json::from_value(serde_json::Value::Object(object))
                .map_err(|e| format!("missing chain_id: {e}"))?;
        if chain_id.trim().is_empty() {
            return Err("chain_id is empty".to_string());
        }
        Ok(Self {
            bytes: document,
            chain_id,
        })
    }
}

#[derive(Serialize)]
struct SynthesizedGenesis<'a> {
    genesis_time: String,
    chain_id: &'a str,
    initial_height: &'static str,
    consensus_params: ConsensusParams,
    validators: Vec<GenesisValidator<'a>>,
    app_hash: &'static str,
}

#[derive(Serialize)]
struct ConsensusParams {
    block: BlockParams,
    evidence: EvidenceParams,
    validator: ValidatorParams,
    version: VersionParams,
}

#[derive(Serialize)]
struct BlockParams {
    max_bytes: &'static str,
    max_gas: &'static str,
}

#[derive(Serialize)]
struct EvidenceParams {
    max_age_num_blocks: &'static str,
    max_age_duration: &'static str,
    max_bytes: &'static str,
}

#[derive(Serialize)]
struct ValidatorParams {
    pub_key_types: [&'static str; 1],
}

#[derive(Serialize)]
struct VersionParams {
    app: &'static str,
}

#[derive(Serialize)]
struct GenesisValidator<'a> {
    address: &'a str,
    pub_key: &'a PublicKey,
    power: &'static str,
    name: &'a str,
}

/// Voting power of the single synthesized validator.
pub const SYNTHESIZED_POWER: &str = "1";

/// Builds a single-validator genesis for a brand-new network.
///
/// # Errors
///
/// Returns `Serialization` if the document cannot be encoded.
pub fn synthesize(
    chain_id: &str,
    moniker: &str,
    key: &ValidatorKey,
    genesis_time: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let genesis = SynthesizedGenesis {
        genesis_time: genesis_time.to_rfc3339_opts(SecondsFormat::Nanos, true),
        chain_id,
        initial_height: "1",
        consensus_params: ConsensusParams {
            block: BlockParams {
                max_bytes: "22020096",
                max_gas: "-1",
            },
            evidence: EvidenceParams {
                max_age_num_blocks: "100000",
                max_age_duration: "172800000000000",
                max_bytes: "1048576",
            },
            validator: ValidatorParams {
                pub_key_types: ["ed25519"],
            },
            version: VersionParams { app: "0" },
        },
        validators: vec![GenesisValidator {
            address: &key.address,
            pub_key: &key.pub_key,
            power: SYNTHESIZED_POWER,
            name: moniker,
        }],
        app_hash: "",
    };

    let mut bytes = serde_json::to_vec_pretty(&genesis)
        .map_err(|e| Error::serialization("consensus genesis", e))?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_extract_unwraps_envelope_preserving_bytes() {
        let body = br#"{"jsonrpc":"2.0","id":-1,"result":{"genesis":{"chain_id":"X",  "validators":[],"app_hash":""}}}"#;
        let doc = GenesisDocument::extract(body).unwrap();
        assert_eq!(doc.chain_id, "X");
        assert_eq!(doc.bytes, br#"{"chain_id":"X",  "validators":[],"app_hash":""}"#);
    }

    #[test]
    fn test_extract_accepts_raw_document() {
        let body = b"{\n  \"chain_id\": \"mainnet-1\",\n  \"validators\": []\n}\n";
        let doc = GenesisDocument::extract(body).unwrap();
        assert_eq!(doc.chain_id, "mainnet-1");
        assert_eq!(doc.bytes, body);
    }

    #[test]
    fn test_extract_rejects_non_documents() {
        for body in [
            &b"[1,2,3]"[..],
            b"<html>502 Bad Gateway</html>",
            b"{\"result\":{\"genesis\":\"chunked\"}}",
            b"{\"validators\":[]}",
            b"{\"chain_id\":\"\"}",
        ] {
            assert!(
                GenesisDocument::extract(body).is_err(),
                "{}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn test_synthesize_single_validator() {
        let key = ValidatorKey {
            address: "AABBCC".to_string(),
            pub_key: PublicKey {
                key_type: "tendermint/PubKeyEd25519".to_string(),
                value: "cHVia2V5".to_string(),
            },
        };
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let bytes = synthesize("devnet-1", "val-0", &key, time).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["chain_id"], "devnet-1");
        assert_eq!(value["genesis_time"], "2024-05-01T12:00:00.000000000Z");
        let validators = value["validators"].as_array().unwrap();
        assert_eq!(validators.len(), 1);
        assert_eq!(validators[0]["address"], "AABBCC");
        assert_eq!(validators[0]["pub_key"]["type"], "tendermint/PubKeyEd25519");
        assert_eq!(validators[0]["power"], "1");
        assert_eq!(validators[0]["name"], "val-0");

        assert_eq!(GenesisDocument::parse(&bytes).unwrap().chain_id, "devnet-1");
    }
}
