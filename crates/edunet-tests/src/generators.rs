//! Test data generators: keys, transactions and chains.

use edunet_chain::transaction::p2pkh_script;
use edunet_chain::{OutPoint, Transaction, TxInput, TxOutput};
use edunet_crypto::{derive_public_key, generate_private_key, hash160, PrivateKey, PublicKey};

/// A fresh keypair.
pub fn keypair() -> (PrivateKey, PublicKey) {
    let sk = generate_private_key();
    let pk = derive_public_key(&sk);
    (sk, pk)
}

/// A locking script for an arbitrary tag.
pub fn script_for(tag: &[u8]) -> Vec<u8> {
    p2pkh_script(&hash160(tag))
}

/// A one-input transaction spending `outpoint` into the given output
/// values.
pub fn spend_to(outpoint: OutPoint, values: &[u64]) -> Transaction {
    Transaction::new(
        2,
        vec![TxInput::new(outpoint, vec![0x51])],
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| TxOutput::new(v, script_for(&[i as u8])))
            .collect(),
        0,
    )
}

/// A transaction spending several outpoints into one output.
pub fn join_inputs(outpoints: &[OutPoint], value: u64) -> Transaction {
    Transaction::new(
        2,
        outpoints
            .iter()
            .map(|&op| TxInput::new(op, vec![0x51]))
            .collect(),
        vec![TxOutput::new(value, script_for(b"joined"))],
        0,
    )
}

/// The outpoint of a transaction's `vout`-th output.
pub fn outpoint_of(tx: &Transaction, vout: u32) -> OutPoint {
    OutPoint::new(tx.txid(), vout)
}
