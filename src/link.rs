use ethers::contract::abigen;

// Minimal LINK (ERC-677) ABI for funding prechecks.
//
// `addFunds` pulls LINK with transferFrom, so the admin needs balance + allowance
// towards the registry before the call can succeed.
abigen!(
    LinkToken,
    r#"[
        function allowance(address owner, address spender) view returns (uint256)
        function balanceOf(address owner) view returns (uint256)
        function approve(address spender, uint256 value) returns (bool)
    ]"#
);
