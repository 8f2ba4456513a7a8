//! Ledger, epoch and pool constants

/// Shannons per CKB: capacity is a fixed-point amount with 8 decimals.
pub const ONE_CKB: u64 = 100_000_000;

/// Bytes occupied by the capacity field of every cell.
pub const CAPACITY_FIELD_SIZE: u64 = 8;

/// Length of a proposal short id (prefix of the transaction hash).
pub const PROPOSAL_SHORT_ID_LENGTH: usize = 10;

/// Index used by the null out-point of a cellbase input.
pub const NULL_OUT_POINT_INDEX: u32 = u32::MAX;

/// Genesis epoch length in blocks. Later epochs are retargeted.
pub const DEFAULT_EPOCH_LENGTH: u64 = 1250;

/// Lower bound of a retargeted epoch length.
pub const MIN_EPOCH_LENGTH: u64 = 300;

/// Upper bound of a retargeted epoch length.
pub const MAX_EPOCH_LENGTH: u64 = 5000;

/// Target epoch duration: 4 hours in milliseconds.
pub const DEFAULT_EPOCH_DURATION_TARGET: u64 = 4 * 60 * 60 * 1000;

/// Primary issuance per epoch, in shannons.
pub const DEFAULT_EPOCH_REWARD: u64 = 191_780_821_917_808;

/// Blocks a cellbase output must wait before it can be spent.
pub const DEFAULT_CELLBASE_MATURITY: u64 = 10;

/// A transaction proposed in block `p` may be committed in `[p + closest, p + farthest]`.
pub const DEFAULT_PROPOSAL_WINDOW_CLOSEST: u64 = 2;
pub const DEFAULT_PROPOSAL_WINDOW_FARTHEST: u64 = 10;

/// Cycle ceiling for verifying a single transaction.
pub const DEFAULT_MAX_TX_VERIFY_CYCLES: u64 = 70_000_000;

/// Maximum serialized transaction size accepted by the pool.
pub const DEFAULT_MAX_TX_SIZE: usize = 512 * 1024;

/// Maximum number of pending + proposed entries.
pub const DEFAULT_MAX_TX_COUNT: usize = 10_000;

/// Maximum total serialized size of pending + proposed entries: 180 MB.
pub const DEFAULT_MAX_POOL_SIZE: usize = 180_000_000;

/// Maximum total cycles of pending + proposed entries.
pub const DEFAULT_MAX_POOL_CYCLES: u64 = 100_000_000_000;

/// Maximum number of orphan entries.
pub const DEFAULT_MAX_ORPHANS: usize = 1_000;

/// Minimum fee rate in shannons per 1000 bytes.
pub const DEFAULT_MIN_FEE_RATE: u64 = 1_000;

/// Cycle budget of all committed transactions in an assembled block.
pub const MAX_BLOCK_CYCLES: u64 = 20_000_000_000;

/// Serialized size budget of committed transactions in an assembled block.
pub const MAX_BLOCK_BYTES: usize = 2_000_000;

/// Proposals an assembled block carries at most.
pub const MAX_BLOCK_PROPOSALS: usize = 1_500;

/// Blocks sampled for the chain median time.
pub const MEDIAN_TIME_BLOCK_COUNT: usize = 37;

/// Maximum number of items on the script VM stack.
pub const MAX_STACK_SIZE: usize = 1000;

/// Exit code: final stack top is false or the stack is empty.
pub const EXIT_FALSE_RESULT: i8 = 1;
/// Exit code: a VERIFY-style opcode failed.
pub const EXIT_VERIFY_FAILED: i8 = 2;
/// Exit code: OP_RETURN executed.
pub const EXIT_RETURN: i8 = 3;
/// Exit code: unknown opcode.
pub const EXIT_INVALID_OPCODE: i8 = 4;
/// Exit code: not enough stack items for an opcode.
pub const EXIT_STACK_UNDERFLOW: i8 = 5;
/// Exit code: stack grew past MAX_STACK_SIZE.
pub const EXIT_STACK_OVERFLOW: i8 = 6;
/// Exit code: cycle ceiling reached.
pub const EXIT_EXCEEDED_MAX_CYCLES: i8 = -1;
/// Exit code: no dep cell carries the program for `code_hash`.
pub const EXIT_CODE_NOT_FOUND: i8 = -2;
