//! ABI of the on-chain delegation authority / batch executor and the ERC-20 calls it relays.
//!
//! The contract itself lives elsewhere; this module only knows the calldata shapes it expects.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolValue};

sol! {
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    interface IDelegationBatchExecutor {
        struct DelegatedOperation {
            address walletAddress;
            address delegateeAddress;
            address airdropContract;
            address tokenContract;
            address receiverAddress;
            bytes claimCalldata;
            bytes transferCalldata;
            bytes delegationCalldata;
        }

        function delegate(
            address delegator,
            address authority,
            uint256 expiry,
            uint256 nonce,
            string[] functions,
            bytes signature
        ) external;

        function revokeDelegation(address delegator, uint256 nonce, bytes signature) external;

        function executeDelegatedOperations(DelegatedOperation[] operations) external payable;
    }
}

sol! {
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
    }
}

sol! {
    /// Delegation proof embedded in every operation, ABI-encoded as a flat parameter list.
    #[derive(Debug, PartialEq, Eq)]
    struct DelegationProof {
        address delegator;
        address delegatee;
        address authority;
        uint256 expiry;
        uint256 nonce;
        string[] functions;
        bytes signature;
    }
}

pub use IDelegationBatchExecutor::DelegatedOperation;

/// `executeDelegatedOperations(operations)` calldata.
pub fn execute_calldata(operations: Vec<DelegatedOperation>) -> Bytes {
    IDelegationBatchExecutor::executeDelegatedOperationsCall { operations }
        .abi_encode()
        .into()
}

/// `delegate(...)` calldata registering a signed grant on-chain.
pub fn delegate_calldata(
    delegator: Address,
    authority: Address,
    expiry: u64,
    nonce: u64,
    functions: Vec<String>,
    signature: Bytes,
) -> Bytes {
    IDelegationBatchExecutor::delegateCall {
        delegator,
        authority,
        expiry: U256::from(expiry),
        nonce: U256::from(nonce),
        functions,
        signature,
    }
    .abi_encode()
    .into()
}

/// `revokeDelegation(delegator, nonce, signature)` calldata.
pub fn revoke_calldata(delegator: Address, nonce: u64, signature: Bytes) -> Bytes {
    IDelegationBatchExecutor::revokeDelegationCall {
        delegator,
        nonce: U256::from(nonce),
        signature,
    }
    .abi_encode()
    .into()
}

/// ERC-20 `transfer(to, amount)` calldata.
pub fn transfer_calldata(to: Address, amount: U256) -> Bytes {
    IERC20::transferCall { to, amount }.abi_encode().into()
}

/// Flat ABI encoding of `(delegator, delegatee, authority, expiry, nonce, functions, signature)`.
pub fn delegation_calldata(proof: &DelegationProof) -> Bytes {
    proof.abi_encode_params().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, bytes};

    #[test]
    fn test_transfer_selector() {
        let calldata = transfer_calldata(address!("00000000000000000000000000000000000000aa"), U256::from(5));
        // keccak("transfer(address,uint256)")[..4]
        assert_eq!(&calldata[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(calldata.len(), 4 + 32 * 2);
    }

    #[test]
    fn test_delegation_calldata_decodes_back() {
        let proof = DelegationProof {
            delegator: address!("00000000000000000000000000000000000000d1"),
            delegatee: address!("00000000000000000000000000000000000000d2"),
            authority: address!("00000000000000000000000000000000000000d2"),
            expiry: U256::from(1_700_086_400u64),
            nonce: U256::from(3),
            functions: vec!["claim()".to_string(), "transfer(address,uint256)".to_string()],
            signature: bytes!("deadbeef"),
        };
        let encoded = delegation_calldata(&proof);
        let decoded = DelegationProof::abi_decode_params(&encoded).unwrap();
        assert_eq!(decoded, proof);
    }

    #[test]
    fn test_revoke_calldata_shape() {
        let calldata = revoke_calldata(
            address!("00000000000000000000000000000000000000d1"),
            7,
            bytes!("01"),
        );
        let decoded = IDelegationBatchExecutor::revokeDelegationCall::abi_decode(&calldata).unwrap();
        assert_eq!(decoded.nonce, U256::from(7));
        assert_eq!(decoded.signature, bytes!("01"));
    }
}
