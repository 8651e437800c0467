use std::fmt;
use std::sync::Arc;

/// Per-account transaction sequence number.
pub type Sequence = u32;
/// Index of a closed ledger.
pub type LedgerIndex = u32;
/// Transaction fee in drops.
pub type Fee = u64;

/// Network identifier of one signed transaction blob.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({self})")
    }
}

impl From<[u8; 32]> for TxHash {
    fn from(bytes: [u8; 32]) -> Self {
        TxHash(bytes)
    }
}

/// Local identity of a queued transaction.
///
/// Unlike the sequence number, the key never changes while the transaction is
/// pending, even when it is moved to a new sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxKey(pub(crate) u64);

impl TxKey {
    /// Raw value of the key.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// Identifier of one submit attempt of a transaction.
///
/// Attempt ids grow monotonically per transaction; a response is stale when its
/// attempt is not the latest one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(pub(crate) u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Class of an [`EngineResult`], derived from its numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultClass {
    /// Local error, the transaction was not forwarded (`tel`).
    Tel,
    /// Malformed transaction (`tem`).
    Tem,
    /// Failure, the transaction can never succeed in this form (`tef`).
    Tef,
    /// Retry later (`ter`).
    Ter,
    /// Success (`tes`).
    Tes,
    /// Fee claimed, sequence consumed, transaction failed (`tec`).
    Tec,
    /// Code outside of all known ranges.
    Unknown,
}

/// Engine result code returned by the ledger server for a submit.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineResult(i32);

impl EngineResult {
    pub const TES_SUCCESS: Self = Self(0);
    pub const TEC_CLAIM: Self = Self(100);
    pub const TEC_UNFUNDED_PAYMENT: Self = Self(104);
    pub const TEF_FAILURE: Self = Self(-199);
    pub const TEF_ALREADY: Self = Self(-198);
    pub const TEF_PAST_SEQ: Self = Self(-190);
    pub const TEL_LOCAL_ERROR: Self = Self(-399);
    pub const TEL_INSUF_FEE_P: Self = Self(-394);
    pub const TEM_MALFORMED: Self = Self(-299);
    pub const TEM_BAD_FEE: Self = Self(-294);
    pub const TER_RETRY: Self = Self(-99);
    pub const TER_PRE_SEQ: Self = Self(-92);

    const KNOWN: [(Self, &'static str); 12] = [
        (Self::TES_SUCCESS, "tesSUCCESS"),
        (Self::TEC_CLAIM, "tecCLAIM"),
        (Self::TEC_UNFUNDED_PAYMENT, "tecUNFUNDED_PAYMENT"),
        (Self::TEF_FAILURE, "tefFAILURE"),
        (Self::TEF_ALREADY, "tefALREADY"),
        (Self::TEF_PAST_SEQ, "tefPAST_SEQ"),
        (Self::TEL_LOCAL_ERROR, "telLOCAL_ERROR"),
        (Self::TEL_INSUF_FEE_P, "telINSUF_FEE_P"),
        (Self::TEM_MALFORMED, "temMALFORMED"),
        (Self::TEM_BAD_FEE, "temBAD_FEE"),
        (Self::TER_RETRY, "terRETRY"),
        (Self::TER_PRE_SEQ, "terPRE_SEQ"),
    ];

    /// Wrap a numeric engine result code.
    pub const fn from_code(code: i32) -> Self {
        Self(code)
    }

    /// Look up a result by its token, e.g. `"tefPAST_SEQ"`.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::KNOWN
            .iter()
            .find(|(_, known)| *known == token)
            .map(|(result, _)| *result)
    }

    /// Numeric code.
    pub fn code(&self) -> i32 {
        self.0
    }

    /// Token of a well-known result.
    pub fn token(&self) -> Option<&'static str> {
        Self::KNOWN
            .iter()
            .find(|(result, _)| result == self)
            .map(|(_, token)| *token)
    }

    /// Result class by code range.
    pub fn class(&self) -> ResultClass {
        match self.0 {
            -399..=-300 => ResultClass::Tel,
            -299..=-200 => ResultClass::Tem,
            -199..=-100 => ResultClass::Tef,
            -99..=-1 => ResultClass::Ter,
            0 => ResultClass::Tes,
            100..=255 => ResultClass::Tec,
            _ => ResultClass::Unknown,
        }
    }
}

impl fmt::Display for EngineResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.token() {
            Some(token) => f.write_str(token),
            None => write!(f, "{:?}({})", self.class(), self.0),
        }
    }
}

impl fmt::Debug for EngineResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineResult({self})")
    }
}

/// Response of a successful submit RPC call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResponse {
    /// Provisional engine result.
    pub engine_result: EngineResult,
    /// Human-readable explanation of the engine result.
    pub engine_result_message: String,
    /// Hash of the submitted transaction, if reported.
    pub tx_hash: Option<TxHash>,
}

impl SubmitResponse {
    /// Response with the given engine result and an empty message.
    pub fn new(engine_result: EngineResult) -> Self {
        Self {
            engine_result,
            engine_result_message: String::new(),
            tx_hash: None,
        }
    }
}

/// One entry of the account's transaction history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    /// Transaction hash.
    pub hash: TxHash,
    /// Account sequence the transaction consumed.
    pub sequence: Sequence,
    /// Ledger the transaction was included in.
    pub ledger_index: LedgerIndex,
    /// Whether the containing ledger is validated.
    pub validated: bool,
    /// Final engine result.
    pub engine_result: EngineResult,
}

/// Forward history query for the managed account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery<Marker> {
    /// First ledger to include.
    pub ledger_index_min: LedgerIndex,
    /// Oldest-first ordering.
    pub forward: bool,
    /// Resume marker of the previous page.
    pub marker: Option<Marker>,
}

/// One page of account transaction history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage<Marker> {
    /// Transactions in this page, oldest first.
    pub transactions: Vec<TransactionResult>,
    /// Highest ledger the server searched for this query.
    pub ledger_index_max: LedgerIndex,
    /// Resume marker when more pages follow.
    pub marker: Option<Marker>,
}

impl<Marker> HistoryPage<Marker> {
    /// Whether another page follows this one.
    pub fn has_next(&self) -> bool {
        self.marker.is_some()
    }
}

/// Server state relevant to submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfo {
    /// Latest closed ledger.
    pub ledger_index: LedgerIndex,
    /// Current load factor.
    pub load_factor: u32,
    /// Load factor that corresponds to an unloaded server.
    pub load_base: u32,
    /// Reference transaction cost in drops.
    pub base_fee: Fee,
}

impl ServerInfo {
    /// Fee required at the current load, rounded up and capped at [`Fee::MAX`].
    pub fn transaction_fee(&self) -> Fee {
        if self.load_base == 0 {
            return self.base_fee;
        }
        let scaled = self.base_fee as u128 * self.load_factor as u128;
        Fee::try_from(scaled.div_ceil(self.load_base as u128)).unwrap_or(Fee::MAX)
    }
}

/// Server view of the managed account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountState {
    /// Next sequence the server expects for the account.
    pub sequence: Sequence,
}

/// Signed transaction blob with its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    /// Serialized, signed transaction.
    pub blob: Arc<Vec<u8>>,
    /// Hash of the blob as the network will report it.
    pub hash: TxHash,
}
