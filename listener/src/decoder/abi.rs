//! Pool contract event definitions.

use alloy::sol;

sol! {
    /// Emitted when a commitment is inserted into the pool.
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    event Deposit(
        bytes32 indexed commitment,
        address indexed depositor,
        uint32 leafIndex,
        uint256 timestamp
    );

    /// Emitted when a note is withdrawn through a relayer.
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    event Withdrawal(
        address to,
        bytes32 nullifierHash,
        address indexed relayer,
        uint256 fee
    );
}

/// Minimum `data` length of a `Deposit` log: `(uint32, uint256)`.
pub const DEPOSIT_DATA_LEN: usize = 64;

/// Minimum `data` length of a `Withdrawal` log: `(address, bytes32, uint256)`.
pub const WITHDRAWAL_DATA_LEN: usize = 96;

/// Topics carried by a `Deposit` log (signature, commitment, depositor).
pub const DEPOSIT_TOPICS: usize = 3;

/// Topics carried by a `Withdrawal` log (signature, relayer).
pub const WITHDRAWAL_TOPICS: usize = 2;
