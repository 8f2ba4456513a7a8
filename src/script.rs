//! Script execution and cycle estimation
//!
//! Every lock and type script of a transaction runs in a small byte-coded
//! stack machine. Each program is loaded from the dep cell whose data hashes
//! to the script's `code_hash`; the group's witness items and the script args
//! are pushed before it runs. Execution is metered in cycles against a
//! per-transaction ceiling.

use crate::cell::{resolve_transaction, CellProvider, ResolvedTransaction};
use crate::constants::*;
use crate::error::{Error, Result, ScriptGroupType, ScriptRef};
use crate::logger::LOG_TARGET_SCRIPT;
use crate::types::*;
use ripemd::Ripemd160;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, Verification};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

pub mod opcodes {
    pub const OP_0: u8 = 0x00;
    /// `0x01..=0x4b` push the next N bytes.
    pub const OP_PUSHBYTES_MAX: u8 = 0x4b;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;
    pub const OP_VERIFY: u8 = 0x69;
    pub const OP_RETURN: u8 = 0x6a;
    pub const OP_2DROP: u8 = 0x6d;
    pub const OP_2DUP: u8 = 0x6e;
    pub const OP_IFDUP: u8 = 0x73;
    pub const OP_DEPTH: u8 = 0x74;
    pub const OP_DROP: u8 = 0x75;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_NIP: u8 = 0x77;
    pub const OP_OVER: u8 = 0x78;
    pub const OP_SWAP: u8 = 0x7c;
    pub const OP_TUCK: u8 = 0x7d;
    pub const OP_SIZE: u8 = 0x82;
    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;
    pub const OP_SHA256: u8 = 0xa8;
    pub const OP_HASH160: u8 = 0xa9;
    pub const OP_HASH256: u8 = 0xaa;
    pub const OP_CHECKSIG: u8 = 0xac;
    pub const OP_CHECKSIGVERIFY: u8 = 0xad;
}

use opcodes::*;

/// Cycles for an ordinary opcode.
const BASE_CYCLES: Cycle = 1;
/// Cycles for a hashing opcode.
const HASH_CYCLES: Cycle = 100;
/// Cycles for a signature check.
const SIGNATURE_CYCLES: Cycle = 5_000;

fn opcode_cycles(opcode: u8) -> Cycle {
    match opcode {
        OP_SHA256 | OP_HASH160 | OP_HASH256 => HASH_CYCLES,
        OP_CHECKSIG | OP_CHECKSIGVERIFY => SIGNATURE_CYCLES,
        _ => BASE_CYCLES,
    }
}

/// Program that leaves `1` on the stack.
pub fn always_success_program() -> Bytes {
    vec![OP_1]
}

/// Pay-to-pubkey-hash lock. Args: `[hash160(pubkey)]`; witness:
/// `[compact signature over the tx hash, compressed pubkey]`.
pub fn secp256k1_lock_program() -> Bytes {
    vec![OP_OVER, OP_HASH160, OP_EQUALVERIFY, OP_CHECKSIG]
}

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&Ripemd160::digest(sha));
    hash
}

fn is_true(item: &[u8]) -> bool {
    item.iter().any(|byte| *byte != 0)
}

fn bool_item(value: bool) -> Bytes {
    if value {
        vec![1]
    } else {
        vec![]
    }
}

/// Exit code of a failed run.
type VmResult<T> = std::result::Result<T, i8>;

struct Machine<'a, C: Verification> {
    stack: Vec<Bytes>,
    cycles: Cycle,
    limit: Cycle,
    message: &'a Hash,
    secp: &'a Secp256k1<C>,
}

impl<'a, C: Verification> Machine<'a, C> {
    fn consume(&mut self, cycles: Cycle) -> VmResult<()> {
        self.cycles = self.cycles.saturating_add(cycles);
        if self.cycles > self.limit {
            return Err(EXIT_EXCEEDED_MAX_CYCLES);
        }
        Ok(())
    }

    fn push(&mut self, item: Bytes) -> VmResult<()> {
        if self.stack.len() >= MAX_STACK_SIZE {
            return Err(EXIT_STACK_OVERFLOW);
        }
        self.stack.push(item);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Bytes> {
        self.stack.pop().ok_or(EXIT_STACK_UNDERFLOW)
    }

    /// Item `depth` positions below the top, 0 being the top.
    fn peek(&self, depth: usize) -> VmResult<Bytes> {
        if depth >= self.stack.len() {
            return Err(EXIT_STACK_UNDERFLOW);
        }
        Ok(self.stack[self.stack.len() - 1 - depth].clone())
    }

    fn run(&mut self, program: &[u8]) -> VmResult<()> {
        self.consume(program.len() as Cycle)?;

        let mut pc = 0;
        while pc < program.len() {
            let opcode = program[pc];
            pc += 1;
            self.consume(opcode_cycles(opcode))?;

            if (0x01..=OP_PUSHBYTES_MAX).contains(&opcode) {
                let end = pc + opcode as usize;
                let data = program.get(pc..end).ok_or(EXIT_INVALID_OPCODE)?;
                self.push(data.to_vec())?;
                pc = end;
            } else {
                self.execute(opcode)?;
            }
        }

        match self.stack.last() {
            Some(top) if is_true(top) => Ok(()),
            _ => Err(EXIT_FALSE_RESULT),
        }
    }

    fn execute(&mut self, opcode: u8) -> VmResult<()> {
        match opcode {
            OP_0 => self.push(vec![]),
            OP_1..=OP_16 => self.push(vec![opcode - (OP_1 - 1)]),
            OP_VERIFY => {
                if is_true(&self.pop()?) {
                    Ok(())
                } else {
                    Err(EXIT_VERIFY_FAILED)
                }
            }
            OP_RETURN => Err(EXIT_RETURN),
            OP_2DROP => {
                self.pop()?;
                self.pop()?;
                Ok(())
            }
            OP_2DUP => {
                let second = self.peek(1)?;
                let top = self.peek(0)?;
                self.push(second)?;
                self.push(top)
            }
            OP_IFDUP => {
                let top = self.peek(0)?;
                if is_true(&top) {
                    self.push(top)?;
                }
                Ok(())
            }
            OP_DEPTH => {
                let depth = (self.stack.len() as u64).to_le_bytes();
                let len = depth.iter().rposition(|byte| *byte != 0).map_or(0, |i| i + 1);
                self.push(depth[..len].to_vec())
            }
            OP_DROP => self.pop().map(|_| ()),
            OP_DUP => {
                let top = self.peek(0)?;
                self.push(top)
            }
            OP_NIP => {
                let top = self.pop()?;
                self.pop()?;
                self.push(top)
            }
            OP_OVER => {
                let second = self.peek(1)?;
                self.push(second)
            }
            OP_SWAP => {
                let top = self.pop()?;
                let second = self.pop()?;
                self.push(top)?;
                self.push(second)
            }
            OP_TUCK => {
                let top = self.pop()?;
                let second = self.pop()?;
                self.push(top.clone())?;
                self.push(second)?;
                self.push(top)
            }
            OP_SIZE => {
                let size = self.peek(0)?.len() as u64;
                let bytes = size.to_le_bytes();
                let len = bytes.iter().rposition(|byte| *byte != 0).map_or(0, |i| i + 1);
                self.push(bytes[..len].to_vec())
            }
            OP_EQUAL => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(bool_item(a == b))
            }
            OP_EQUALVERIFY => {
                let a = self.pop()?;
                let b = self.pop()?;
                if a == b {
                    Ok(())
                } else {
                    Err(EXIT_VERIFY_FAILED)
                }
            }
            OP_SHA256 => {
                let item = self.pop()?;
                self.push(Sha256::digest(&item).to_vec())
            }
            OP_HASH160 => {
                let item = self.pop()?;
                self.push(hash160(&item).to_vec())
            }
            OP_HASH256 => {
                let item = self.pop()?;
                let first = Sha256::digest(&item);
                self.push(Sha256::digest(first).to_vec())
            }
            OP_CHECKSIG => {
                let pubkey = self.pop()?;
                let signature = self.pop()?;
                let valid = verify_signature(self.secp, &pubkey, &signature, self.message);
                self.push(bool_item(valid))
            }
            OP_CHECKSIGVERIFY => {
                let pubkey = self.pop()?;
                let signature = self.pop()?;
                if verify_signature(self.secp, &pubkey, &signature, self.message) {
                    Ok(())
                } else {
                    Err(EXIT_VERIFY_FAILED)
                }
            }
            _ => Err(EXIT_INVALID_OPCODE),
        }
    }
}

/// Verify a 64-byte compact ECDSA signature by `pubkey_bytes` over `message`.
fn verify_signature<C: Verification>(
    secp: &Secp256k1<C>,
    pubkey_bytes: &[u8],
    signature_bytes: &[u8],
    message: &Hash,
) -> bool {
    let pubkey = match PublicKey::from_slice(pubkey_bytes) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let signature = match Signature::from_compact(signature_bytes) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    let message = match Message::from_digest_slice(message) {
        Ok(message) => message,
        Err(_) => return false,
    };
    secp.verify_ecdsa(&message, &signature, &pubkey).is_ok()
}

/// Scripts sharing one hash run once, over all the cells they guard.
#[derive(Debug, Clone)]
struct ScriptGroup {
    script: Script,
    script_ref: ScriptRef,
    /// First input guarded by the script, if any.
    first_input: Option<usize>,
}

fn push_group(
    groups: &mut Vec<ScriptGroup>,
    seen: &mut HashMap<Hash, usize>,
    script: &Script,
    group_type: ScriptGroupType,
    index: usize,
    input: Option<usize>,
) {
    let script_hash = script.hash();
    if seen.contains_key(&script_hash) {
        return;
    }
    seen.insert(script_hash, groups.len());
    groups.push(ScriptGroup {
        script: script.clone(),
        script_ref: ScriptRef { group_type, script_hash, index },
        first_input: input,
    });
}

/// Lock groups over inputs, then type groups over inputs and outputs, each in
/// first-appearance order.
fn script_groups(resolved: &ResolvedTransaction<'_>) -> Vec<ScriptGroup> {
    let mut groups = Vec::new();

    let mut locks = HashMap::new();
    for (i, meta) in resolved.resolved_inputs.iter().enumerate() {
        let lock = &meta.cell_output.lock;
        push_group(&mut groups, &mut locks, lock, ScriptGroupType::Lock, i, Some(i));
    }

    let mut types = HashMap::new();
    for (i, meta) in resolved.resolved_inputs.iter().enumerate() {
        if let Some(type_) = &meta.cell_output.type_ {
            push_group(&mut groups, &mut types, type_, ScriptGroupType::Type, i, Some(i));
        }
    }
    for (i, output) in resolved.transaction.outputs.iter().enumerate() {
        if let Some(type_) = &output.type_ {
            push_group(&mut groups, &mut types, type_, ScriptGroupType::Type, i, None);
        }
    }

    groups
}

/// Runs every script of a resolved transaction and reports total cycles.
///
/// Stateless and read-only: safe to share across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptCycleEstimator {
    max_cycles: Cycle,
}

impl ScriptCycleEstimator {
    pub fn new(max_cycles: Cycle) -> Self {
        ScriptCycleEstimator { max_cycles }
    }

    pub fn max_cycles(&self) -> Cycle {
        self.max_cycles
    }

    /// Estimate: ResolvedTx → ℕ
    ///
    /// 1. Split scripts into lock and type groups
    /// 2. For each group, load the program from the deps by `code_hash`
    /// 3. Push witness items and args, then run the program
    /// 4. Sum cycles; the sum must stay within `max_cycles`
    pub fn estimate(&self, resolved: &ResolvedTransaction<'_>) -> Result<Cycle> {
        let tx_hash = resolved.transaction.hash();
        let secp = Secp256k1::verification_only();
        let mut total: Cycle = 0;

        for group in script_groups(resolved) {
            let fail = |exit_code: i8| {
                debug!(
                    target: LOG_TARGET_SCRIPT,
                    "tx 0x{} failed {} with exit code {}",
                    hex::encode(tx_hash),
                    group.script_ref,
                    exit_code
                );
                Error::ScriptFailure { exit_code, script_ref: group.script_ref }
            };

            let program = resolved
                .resolved_deps
                .iter()
                .find(|dep| dep.cell_output.data_hash() == group.script.code_hash)
                .map(|dep| &dep.cell_output.data)
                .ok_or_else(|| fail(EXIT_CODE_NOT_FOUND))?;

            let witness = group
                .first_input
                .and_then(|i| resolved.transaction.witnesses.get(i))
                .cloned()
                .unwrap_or_default();

            let mut machine = Machine {
                stack: Vec::new(),
                cycles: 0,
                limit: self.max_cycles - total,
                message: &tx_hash,
                secp: &secp,
            };
            let outcome = witness
                .into_iter()
                .chain(group.script.args.iter().cloned())
                .try_for_each(|item| machine.push(item))
                .and_then(|_| machine.run(program));
            outcome.map_err(fail)?;

            total += machine.cycles;
        }

        debug!(
            target: LOG_TARGET_SCRIPT,
            "tx 0x{} verified in {} cycles",
            hex::encode(tx_hash),
            total
        );
        Ok(total)
    }

    /// Resolve `transaction` against `provider`, then estimate.
    pub fn dry_run<P: CellProvider + ?Sized>(
        &self,
        transaction: &Transaction,
        provider: &P,
    ) -> Result<Cycle> {
        let resolved = resolve_transaction(transaction, provider)?;
        self.estimate(&resolved)
    }
}

impl Default for ScriptCycleEstimator {
    fn default() -> Self {
        ScriptCycleEstimator::new(DEFAULT_MAX_TX_VERIFY_CYCLES)
    }
}
