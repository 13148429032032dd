//! Venue Validator
//!
//! Confirms a candidate venue's contracts exist and look like the protocol
//! it claims before the detector is allowed to scan it.
//!
//! Interface checks search the hex bytecode for 4-byte selectors instead of
//! calling the contract: many factories sit behind proxies where a live call
//! can revert even though the function exists in the logic contract.

use alloy_primitives::{Address, Bytes};
use alloy_sol_types::SolCall;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::abi::{IUniswapV2Factory, IUniswapV2Router02, IUniswapV3Factory, ISwapRouter, ISwapRouter02};
use crate::chain::ChainReader;
use crate::registry::{DexProtocolType, Venue};
use crate::tokens::checksum;

/// Outcome of one validation pass; `errors` lists every problem found
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    /// Copy the verdict onto the venue record
    pub fn apply(&self, venue: &mut Venue) {
        venue.validated = self.is_valid;
        venue.validation_errors = self.errors.clone();
    }
}

/// Selector sets per protocol: a lookup function plus alternatives of which
/// at least one must be present
struct FactoryInterface {
    lookup: (&'static str, [u8; 4]),
    any_of: &'static [(&'static str, [u8; 4])],
}

const V2_FACTORY: FactoryInterface = FactoryInterface {
    lookup: ("getPair", IUniswapV2Factory::getPairCall::SELECTOR),
    any_of: &[
        ("allPairsLength", IUniswapV2Factory::allPairsLengthCall::SELECTOR),
        ("createPair", IUniswapV2Factory::createPairCall::SELECTOR),
    ],
};

const V3_FACTORY: FactoryInterface = FactoryInterface {
    lookup: ("getPool", IUniswapV3Factory::getPoolCall::SELECTOR),
    any_of: &[
        ("createPool", IUniswapV3Factory::createPoolCall::SELECTOR),
        ("feeAmountTickSpacing", IUniswapV3Factory::feeAmountTickSpacingCall::SELECTOR),
    ],
};

const V2_ROUTER: &[(&str, [u8; 4])] = &[
    ("swapExactTokensForTokens", IUniswapV2Router02::swapExactTokensForTokensCall::SELECTOR),
    ("swapTokensForExactTokens", IUniswapV2Router02::swapTokensForExactTokensCall::SELECTOR),
];

const V3_ROUTER: &[(&str, [u8; 4])] = &[
    ("exactInputSingle", ISwapRouter::exactInputSingleCall::SELECTOR),
    ("exactInputSingle", ISwapRouter02::exactInputSingleCall::SELECTOR),
    ("exactInput", ISwapRouter::exactInputCall::SELECTOR),
    ("exactOutputSingle", ISwapRouter::exactOutputSingleCall::SELECTOR),
    ("exactOutput", ISwapRouter::exactOutputCall::SELECTOR),
];

/// Hex-encoded bytecode for selector probing
struct CodeHex(String);

impl CodeHex {
    fn new(code: &Bytes) -> Self {
        Self(hex::encode(code))
    }

    fn has(&self, selector: &[u8; 4]) -> bool {
        self.0.contains(&hex::encode(selector))
    }
}

pub struct VenueValidator {
    chain: Arc<dyn ChainReader>,
}

impl VenueValidator {
    pub fn new(chain: Arc<dyn ChainReader>) -> Self {
        Self { chain }
    }

    pub async fn validate(&self, venue: &Venue) -> ValidationReport {
        let mut errors = Vec::new();

        let (factory_code, router_code, quoter_code) = tokio::join!(
            self.code_of(Some(venue.factory)),
            self.code_of(venue.router),
            self.code_of(venue.quoter),
        );

        // 1. Factory
        let factory_hex = self.check_exists("factory", venue.factory, factory_code, &mut errors);
        if let Some(code) = &factory_hex {
            let interface = match venue.protocol {
                DexProtocolType::AmmV2 => Some(&V2_FACTORY),
                DexProtocolType::AmmV3 => Some(&V3_FACTORY),
                _ => None,
            };
            if let Some(interface) = interface {
                let (lookup_name, lookup) = interface.lookup;
                let has_extra = interface.any_of.iter().any(|(_, s)| code.has(s));
                if !code.has(&lookup) || !has_extra {
                    let extras: Vec<&str> = interface.any_of.iter().map(|(n, _)| *n).collect();
                    errors.push(format!(
                        "factory {} does not expose the {} factory interface ({} + one of {})",
                        checksum(&venue.factory),
                        venue.protocol,
                        lookup_name,
                        extras.join("/")
                    ));
                }
            }
        }

        // 2. Router
        match venue.router {
            None => errors.push("router address is not set".to_string()),
            Some(router) => {
                if let Some(code) = self.check_exists("router", router, router_code, &mut errors) {
                    let swaps = match venue.protocol {
                        DexProtocolType::AmmV2 => Some(V2_ROUTER),
                        DexProtocolType::AmmV3 => Some(V3_ROUTER),
                        _ => None,
                    };
                    if let Some(swaps) = swaps {
                        if !swaps.iter().any(|(_, s)| code.has(s)) {
                            errors.push(format!(
                                "router {} exposes none of the {} swap functions",
                                checksum(&router),
                                venue.protocol
                            ));
                        }
                    }
                }
            }
        }

        // 3. Quoter: existence only
        if let Some(quoter) = venue.quoter {
            self.check_exists("quoter", quoter, quoter_code, &mut errors);
        }

        // 4. Protocol cross-check
        if let Some(code) = &factory_hex {
            let has_v2 = code.has(&IUniswapV2Factory::getPairCall::SELECTOR);
            let has_v3 = code.has(&IUniswapV3Factory::getPoolCall::SELECTOR);
            match venue.protocol {
                DexProtocolType::AmmV2 if !has_v2 => errors.push(format!(
                    "protocol mismatch: {} declared AMM-V2 but factory has no getPair{}",
                    venue.name,
                    if has_v3 { " (looks like AMM-V3)" } else { "" }
                )),
                DexProtocolType::AmmV3 if !has_v3 => errors.push(format!(
                    "protocol mismatch: {} declared AMM-V3 but factory has no getPool{}",
                    venue.name,
                    if has_v2 { " (looks like AMM-V2)" } else { "" }
                )),
                _ => {}
            }
        }

        let report = ValidationReport::from_errors(errors);
        if report.is_valid {
            debug!("✅ {} validated", venue.name);
        } else {
            debug!("❌ {} failed validation: {:?}", venue.name, report.errors);
        }
        report
    }

    /// Validate and record the verdict on the venue itself
    pub async fn validate_venue(&self, mut venue: Venue) -> Venue {
        let report = self.validate(&venue).await;
        report.apply(&mut venue);
        venue
    }

    /// Validate many venues, returning them with verdicts applied
    pub async fn validate_all(&self, venues: Vec<Venue>) -> Vec<Venue> {
        let checked = futures::future::join_all(venues.into_iter().map(|v| self.validate_venue(v))).await;
        let valid = checked.iter().filter(|v| v.validated).count();
        info!("🔎 Validated {}/{} venues", valid, checked.len());
        checked
    }

    async fn code_of(&self, address: Option<Address>) -> Option<Result<Bytes, String>> {
        let address = address?;
        if address == Address::ZERO {
            return None;
        }
        Some(self.chain.get_code(address).await.map_err(|e| e.to_string()))
    }

    /// Record an error unless `address` has bytecode; returns it hex-encoded
    fn check_exists(
        &self,
        role: &str,
        address: Address,
        code: Option<Result<Bytes, String>>,
        errors: &mut Vec<String>,
    ) -> Option<CodeHex> {
        match code {
            None => {
                errors.push(format!("{} address is not set", role));
                None
            }
            Some(Err(e)) => {
                warn!("Could not fetch {} bytecode at {}: {}", role, checksum(&address), e);
                errors.push(format!("{} bytecode unavailable for {}: {}", role, checksum(&address), e));
                None
            }
            Some(Ok(code)) if code.is_empty() => {
                errors.push(format!("{} contract does not exist: {}", role, checksum(&address)));
                None
            }
            Some(Ok(code)) => Some(CodeHex::new(&code)),
        }
    }
}
