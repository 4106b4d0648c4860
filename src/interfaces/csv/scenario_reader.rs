use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::io::Read;

/// One step of a replay scenario.
///
/// Columns are positional and mostly optional; each op reads the subset it
/// needs. Entities are named by free-form aliases (`alice`, `o1`, `tomatoes`)
/// which the replay runner interns to ids on first sight.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioStep {
    pub op: StepOp,
    #[serde(default)]
    pub actor: String,
    /// Order alias, or payout alias for payout ops.
    #[serde(default)]
    pub order: String,
    /// Product alias.
    #[serde(default)]
    pub item: String,
    #[serde(default)]
    pub qty: Option<u32>,
    /// Minor currency units.
    #[serde(default)]
    pub amount: Option<i64>,
    /// Payment, payout or delivery method, depending on the op.
    #[serde(default)]
    pub method: String,
    /// Payer or payout account details.
    #[serde(default)]
    pub account: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOp {
    /// Seed a catalog product: `actor` is the farmer, `item` the product
    /// alias, `qty` the stock, `amount` the unit price.
    Product,
    Deposit,
    Order,
    Confirm,
    Pay,
    /// Deliver the gateway confirmation for the order's pending attempt.
    CallbackOk,
    CallbackFail,
    Transit,
    Deliver,
    Receive,
    Cancel,
    Reject,
    Payout,
    ApprovePayout,
    RejectPayout,
}

/// Streams scenario steps from a CSV source. Wraps `csv::Reader` with
/// whitespace trimming and flexible record lengths, so trailing columns may
/// be omitted.
pub struct ScenarioReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ScenarioReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and deserializes steps, so large scenarios stream without
    /// being held in memory.
    pub fn steps(mut self) -> impl Iterator<Item = Result<ScenarioStep>> {
        // The csv crate reports `UnexpectedEndOfRow` instead of applying serde
        // defaults to omitted trailing columns, so pad short records to the
        // header length before deserializing.
        let (headers, header_err) = match self.reader.headers() {
            Ok(headers) => (headers.clone(), None),
            Err(err) => (csv::StringRecord::new(), Some(err)),
        };
        header_err
            .into_iter()
            .map(|err| Err(EngineError::from(err)))
            .chain(self.reader.into_records().map(move |result| {
                result
                    .and_then(|mut record| {
                        while record.len() < headers.len() {
                            record.push_field("");
                        }
                        record.deserialize(Some(&headers))
                    })
                    .map_err(EngineError::from)
            }))
    }
}
