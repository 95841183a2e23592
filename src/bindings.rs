use ethers::contract::abigen;

// Full binding generated from the compiled artifact (ABI + deployment bytecode).
//
// The artifact carries `bytecode`, so abigen also emits `KeeperRegistryLogic20::deploy`.
// Event/error types derive serde so `watch` can print them as JSON lines.
abigen!(
    KeeperRegistryLogic20,
    "./abi/KeeperRegistryLogic2_0.json",
    derives(serde::Serialize, serde::Deserialize)
);

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::{AbiDecode, RawLog, Token};
    use ethers::contract::{EthError, EthEvent, EthLogDecode};
    use ethers::types::{Address, H256, U256};
    use ethers::utils::keccak256;

    fn topic_u256(v: u64) -> H256 {
        let mut out = [0u8; 32];
        U256::from(v).to_big_endian(&mut out);
        H256(out)
    }

    #[test]
    fn event_signatures_match_solidity_declarations() {
        assert_eq!(
            UpkeepRegisteredFilter::signature(),
            H256(keccak256("UpkeepRegistered(uint256,uint32,address)"))
        );
        assert_eq!(
            UpkeepPerformedFilter::signature(),
            H256(keccak256(
                "UpkeepPerformed(uint256,bool,uint32,uint256,uint256,uint96)"
            ))
        );
        assert_eq!(
            UpkeepCanceledFilter::signature(),
            H256(keccak256("UpkeepCanceled(uint256,uint64)"))
        );
    }

    #[test]
    fn error_selectors_match_solidity_declarations() {
        assert_eq!(
            &UpkeepNotNeeded::selector()[..],
            &keccak256("UpkeepNotNeeded()")[..4]
        );
        assert_eq!(
            &TargetCheckReverted::selector()[..],
            &keccak256("TargetCheckReverted(bytes)")[..4]
        );
    }

    #[test]
    fn decodes_upkeep_registered_log_into_events_enum() {
        let admin = Address::from_low_u64_be(0xad);
        let raw = RawLog {
            topics: vec![UpkeepRegisteredFilter::signature(), topic_u256(42)],
            data: ethers::abi::encode(&[Token::Uint(U256::from(500_000u64)), Token::Address(admin)]),
        };

        let ev = KeeperRegistryLogic20Events::decode_log(&raw).unwrap();
        match ev {
            KeeperRegistryLogic20Events::UpkeepRegisteredFilter(f) => {
                assert_eq!(f.id, U256::from(42u64));
                assert_eq!(f.execute_gas, 500_000);
                assert_eq!(f.admin, admin);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn indexed_bool_topic_decodes_on_upkeep_performed() {
        let raw = RawLog {
            topics: vec![
                UpkeepPerformedFilter::signature(),
                topic_u256(7),
                topic_u256(0),
            ],
            data: ethers::abi::encode(&[
                Token::Uint(U256::from(100u64)),
                Token::Uint(U256::from(81_000u64)),
                Token::Uint(U256::from(80_000u64)),
                Token::Uint(U256::from(1_000_000_000_000u64)),
            ]),
        };

        let ev = <UpkeepPerformedFilter as EthEvent>::decode_log(&raw).unwrap();
        assert_eq!(ev.id, U256::from(7u64));
        assert!(!ev.success);
        assert_eq!(ev.check_block_number, 100);
        assert_eq!(ev.total_payment, 1_000_000_000_000u128);
    }

    #[test]
    fn foreign_topic_is_rejected() {
        let raw = RawLog {
            topics: vec![H256(keccak256("Transfer(address,address,uint256)"))],
            data: vec![],
        };
        assert!(KeeperRegistryLogic20Events::decode_log(&raw).is_err());
    }

    #[test]
    fn errors_enum_decodes_selector_only_payload() {
        let data = keccak256("OnlySimulatedBackend()")[..4].to_vec();
        let decoded = KeeperRegistryLogic20Errors::decode(data).unwrap();
        assert!(matches!(
            decoded,
            KeeperRegistryLogic20Errors::OnlySimulatedBackend(_)
        ));
    }
}
