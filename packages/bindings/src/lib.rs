use napi::Result as NapiResult;
use napi_derive::napi;
use rust_decimal::Decimal;
use serde::Deserialize;

use equity_alloc_core::breakpoints::{solve_breakpoints, Breakpoint};
use equity_alloc_core::cap_table::CapTable;

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

fn sorted_breakpoints(cap_table: &CapTable) -> NapiResult<Vec<Breakpoint>> {
    Ok(solve_breakpoints(cap_table)
        .map_err(to_napi_error)?
        .result
        .sorted_breakpoints)
}

// ---------------------------------------------------------------------------
// Breakpoints
// ---------------------------------------------------------------------------

#[napi]
pub fn solve_waterfall_breakpoints(cap_table_json: String) -> NapiResult<String> {
    let cap_table: CapTable = serde_json::from_str(&cap_table_json).map_err(to_napi_error)?;
    let output = solve_breakpoints(&cap_table).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn waterfall_ranges(cap_table_json: String) -> NapiResult<String> {
    let cap_table: CapTable = serde_json::from_str(&cap_table_json).map_err(to_napi_error)?;
    let ranges =
        equity_alloc_core::allocation::build_waterfall_ranges(&sorted_breakpoints(&cap_table)?);
    serde_json::to_string(&ranges).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// RVPS
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RvpsRequest {
    cap_table: CapTable,
    exit_value: Decimal,
    #[serde(default)]
    range_index: Option<usize>,
}

#[napi]
pub fn rvps_at_value(input_json: String) -> NapiResult<String> {
    let request: RvpsRequest = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let breakpoints = sorted_breakpoints(&request.cap_table)?;
    match request.range_index {
        Some(index) => {
            let ranges = equity_alloc_core::allocation::build_waterfall_ranges(&breakpoints);
            let entries =
                equity_alloc_core::allocation::compute_rvps(&ranges, request.exit_value, index)
                    .map_err(to_napi_error)?;
            serde_json::to_string(&entries).map_err(to_napi_error)
        }
        None => {
            let output =
                equity_alloc_core::allocation::compute_rvps_at_value(&breakpoints, request.exit_value)
                    .map_err(to_napi_error)?;
            serde_json::to_string(&output).map_err(to_napi_error)
        }
    }
}

// ---------------------------------------------------------------------------
// OPM
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct OpmRequest {
    cap_table: CapTable,
    params: equity_alloc_core::opm::OpmParams,
}

#[napi]
pub fn opm_allocation(input_json: String) -> NapiResult<String> {
    let request: OpmRequest = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let breakpoints = sorted_breakpoints(&request.cap_table)?;
    let output = equity_alloc_core::opm::run_opm_backsolve(&request.params, &breakpoints)
        .map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[derive(Deserialize)]
struct BacksolveRequest {
    cap_table: CapTable,
    input: equity_alloc_core::opm::BacksolveInput,
}

#[napi]
pub fn backsolve_company_value(input_json: String) -> NapiResult<String> {
    let request: BacksolveRequest = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let breakpoints = sorted_breakpoints(&request.cap_table)?;
    let output = equity_alloc_core::opm::backsolve_company_value(&request.input, &breakpoints)
        .map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// DLOM
// ---------------------------------------------------------------------------

#[napi]
pub fn dlom(input_json: String) -> NapiResult<String> {
    let input: equity_alloc_core::pricing::dlom::DlomInput =
        serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output =
        equity_alloc_core::pricing::dlom::calculate_dlom(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Assumptions-driven session
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ValuationRequest {
    assumptions: equity_alloc_core::config::ValuationAssumptions,
    cap_table: CapTable,
}

/// Full valuation from one assumptions document: breakpoints, OPM, the
/// optional backsolve, and DLOM.
#[napi]
pub fn run_valuation(input_json: String) -> NapiResult<String> {
    let request: ValuationRequest = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let engine =
        equity_alloc_core::ValuationEngine::new(request.assumptions).map_err(to_napi_error)?;
    let breakpoints = engine
        .breakpoints(&request.cap_table)
        .map_err(to_napi_error)?;
    let opm = engine.opm(&request.cap_table).map_err(to_napi_error)?;
    let backsolve = match engine.assumptions().backsolve {
        Some(_) => Some(engine.backsolve(&request.cap_table).map_err(to_napi_error)?),
        None => None,
    };
    let dlom = engine.dlom().map_err(to_napi_error)?;
    let output = serde_json::json!({
        "breakpoints": breakpoints,
        "opm": opm,
        "backsolve": backsolve,
        "dlom": dlom,
    });
    serde_json::to_string(&output).map_err(to_napi_error)
}
