//! Solidity interfaces of the exchange contracts this crate drives.
//!
//! Only the entry points used by deployment, upgrade and inspection are
//! declared; the contracts themselves are external.

use alloy::sol;

sol! {
    /// OpenZeppelin `ProxyAdmin`, the upgrade admin of transparent proxies.
    interface IProxyAdmin {
        function owner() external view returns (address);
        function getProxyImplementation(address proxy) external view returns (address);
        function getProxyAdmin(address proxy) external view returns (address);
        function upgrade(address proxy, address implementation) external;
        function upgradeAndCall(address proxy, address implementation, bytes data) external payable;
    }

    /// OpenZeppelin `UpgradeableBeacon`.
    interface IUpgradeableBeacon {
        function owner() external view returns (address);
        function implementation() external view returns (address);
    }

    interface ISymbolService {
        function initialize(uint256 reservedSymbolCount) external;
        function owner() external view returns (address);
        function addWhitelistedFactory(address factory) external;
        function removeWhitelistedFactory(address factory) external;
        function isWhitelistedFactory(address factory) external view returns (bool);

        event AddWhitelistedFactory(address indexed factory);
        event RemoveWhitelistedFactory(address indexed factory);
    }

    interface IPoolCreator {
        function initialize(address symbolService, address globalVault, int256 globalVaultFeeRate) external;
        function owner() external view returns (address);
        function upgradeAdmin() external view returns (address);
        function getVault() external view returns (address);
        function getVaultFeeRate() external view returns (int256);

        function addVersion(address[] implementations, address governor, uint256 compatibility, string note) external;
        function isVersionKeyValid(bytes32 versionKey) external view returns (bool);
        function getVersion(bytes32 versionKey) external view returns (address[] implementations, address governor, uint256 compatibility);
        function getLatestVersion() external view returns (bytes32);

        function createLiquidityPool(address collateral, uint256 collateralDecimals, int256 nonce, bytes initData) external returns (address liquidityPool, address governor);
        function getLiquidityPoolCount() external view returns (uint256);
        function listLiquidityPools(uint256 begin, uint256 end) external view returns (address[]);

        function addKeeper(address keeper) external;
        function isKeeper(address keeper) external view returns (bool);
        function listKeepers(uint256 begin, uint256 end) external view returns (address[]);
        function addGuardian(address guardian) external;
        function isGuardian(address guardian) external view returns (bool);

        event AddGuardian(address indexed guardian);
        event TransferGuardian(address indexed oldGuardian, address indexed newGuardian);
        event RenounceGuardian(address indexed oldGuardian);
        event CreateLiquidityPool(bytes32 versionKey, address indexed liquidityPool, address indexed governor, address indexed operator, address collateral, uint256 collateralDecimals, bytes initData);
    }

    /// Governor paired with each liquidity pool; owns the upgrade proposal
    /// lifecycle of its pool + governor proxy group.
    interface ILpGovernor {
        function proposeToUpgradeAndCall(bytes32 targetVersionKey, bytes dataForLiquidityPool, bytes dataForGovernor, string description) external returns (uint256);
        function execute(uint256 proposalId) external payable;
        function getProposal(uint256 proposalId) external view returns (address proposer, bytes32 versionKey, bytes dataForLiquidityPool, bytes dataForGovernor, uint256 startBlock, bool executed, bool canceled);
        function proposalCount() external view returns (uint256);
        function proposalThreshold() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);

        event ProposalCreated(uint256 id, address proposer, bytes32 versionKey, uint256 startBlock, uint256 endBlock, string description);
    }

    interface IAccessControl {
        function getRoleMemberCount(bytes32 role) external view returns (uint256);
        function getRoleMember(bytes32 role, uint256 index) external view returns (address);
        function grantRole(bytes32 role, address account) external;
    }
}
