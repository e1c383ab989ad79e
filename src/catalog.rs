// Coin Catalog
//
// Maps a coin/algorithm pair to the miner that should run it and therefore
// to the telemetry mode. The default router knows the algorithm families
// supported by XMRig and cpuminer-opt; other catalogs can be plugged in.

use crate::error::{MinerError, Result};
use crate::types::MinerKind;
use serde::{Deserialize, Serialize};

const XMRIG_FAMILIES: &[&str] = &[
    "rx", "cn", "cn-lite", "cn-heavy", "cn-pico", "argon2", "verushash",
];

const XMRIG_ALGORITHMS: &[&str] = &["randomx", "ghostrider", "gr", "verushash"];

const CPUMINER_ALGORITHMS: &[&str] = &[
    "sha256d", "scrypt", "x11", "x13", "x14", "x15", "x16r", "x16rv2", "x16s", "x17",
    "x21s", "x22i", "x25x", "lyra2v2", "lyra2v3", "lyra2z", "lyra2h", "yescrypt",
    "yescryptr8", "yescryptr16", "yescryptr32", "yespower", "yespowerr16", "allium",
    "blake", "blake2b", "blake2s", "groestl", "keccak", "lbry", "neoscrypt", "nist5",
    "phi2", "quark", "qubit", "skein", "skein2", "tribus", "whirlpool",
];

const GPU_ONLY_ALGORITHMS: &[&str] = &[
    "ethash", "etchash", "kawpow", "kheavyhash", "autolykos2", "equihash", "zelhash",
    "cuckoo", "cuckatoo", "cuckaroo", "beamhash", "progpow",
];

const ASIC_ALGORITHMS: &[&str] = &["sha256d", "scrypt"];

/// Default algorithm for well-known CPU coins when the request leaves it blank
const KNOWN_COINS: &[(&str, &str)] = &[
    ("monero", "rx/0"),
    ("xmr", "rx/0"),
    ("wownero", "rx/wow"),
    ("wow", "rx/wow"),
    ("arqma", "rx/arq"),
    ("raptoreum", "gr"),
    ("rtm", "gr"),
    ("verus", "verushash"),
    ("vrsc", "verushash"),
    ("bitcoin", "sha256d"),
    ("litecoin", "scrypt"),
];

/// What the catalog decided for a start request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinProfile {
    pub algorithm: String,
    pub miner_kind: MinerKind,
    pub warning: Option<String>,
}

/// Coin/pool definition collaborator
pub trait CoinCatalog: Send + Sync {
    fn resolve(&self, coin_id: &str, algorithm: &str) -> Result<CoinProfile>;
}

/// Routes by algorithm family
#[derive(Debug, Default, Clone)]
pub struct AlgorithmRouter;

impl CoinCatalog for AlgorithmRouter {
    fn resolve(&self, coin_id: &str, algorithm: &str) -> Result<CoinProfile> {
        let algorithm = if algorithm.trim().is_empty() {
            let coin = coin_id.trim().to_lowercase();
            KNOWN_COINS
                .iter()
                .find(|(name, _)| *name == coin)
                .map(|(_, algo)| algo.to_string())
                .ok_or_else(|| {
                    MinerError::InvalidConfig(format!("no algorithm known for coin {}", coin_id))
                })?
        } else {
            algorithm.trim().to_lowercase()
        };
        route_algorithm(&algorithm)
    }
}

/// Pick the miner for an algorithm
pub fn route_algorithm(algorithm: &str) -> Result<CoinProfile> {
    let algo = match algorithm.to_lowercase().as_str() {
        "sha256" | "sha-256" => "sha256d".to_string(),
        other => other.to_string(),
    };

    if is_xmrig_algorithm(&algo) {
        return Ok(CoinProfile {
            algorithm: algo,
            miner_kind: MinerKind::Xmrig,
            warning: None,
        });
    }

    if GPU_ONLY_ALGORITHMS.contains(&algo.as_str()) {
        return Err(MinerError::InvalidConfig(format!(
            "{} requires GPU hardware",
            algo
        )));
    }

    if CPUMINER_ALGORITHMS.contains(&algo.as_str()) {
        let warning = ASIC_ALGORITHMS.contains(&algo.as_str()).then(|| {
            format!("{} is dominated by ASIC miners; CPU hashrate will be negligible", algo)
        });
        return Ok(CoinProfile {
            algorithm: algo,
            miner_kind: MinerKind::CpuminerOpt,
            warning,
        });
    }

    Err(MinerError::InvalidConfig(format!(
        "no CPU miner available for algorithm {}",
        algo
    )))
}

fn is_xmrig_algorithm(algo: &str) -> bool {
    if XMRIG_ALGORITHMS.contains(&algo) {
        return true;
    }
    match algo.split_once('/') {
        Some((family, variant)) => !variant.is_empty() && XMRIG_FAMILIES.contains(&family),
        None => false,
    }
}
