//! Property-based tests for reference rendering.
//!
//! These tests use proptest to verify:
//! - Command build and echo extraction are inverses for any value
//! - Index echo stripping never loses value tokens
//! - The bracket suffix always carries the trailing segments

#![cfg(test)]

use proptest::prelude::*;

use crate::reference::{ObjKind, Target};

fn arb_indexed_kind() -> impl Strategy<Value = ObjKind> {
    prop_oneof![
        Just(ObjKind::Stream),
        Just(ObjKind::Filter),
        Just(ObjKind::Match),
        Just(ObjKind::Length),
        Just(ObjKind::Tpld),
    ]
}

prop_compose! {
    fn arb_target()(
        kind in arb_indexed_kind(),
        module in 0u32..12,
        port in 0u32..8,
        sub in 0u32..64,
    ) -> Target {
        Target {
            kind,
            chassis: "10.1.1.1".to_string(),
            index: format!("{module}/{port}/{sub}"),
            reference: format!("tester/10.1.1.1/{module}/{port}/{sub}"),
        }
    }
}

proptest! {
    #[test]
    fn echo_extraction_inverts_command_build(
        target in arb_target(),
        value in "[a-zA-Z0-9_:-]{1,24}",
    ) {
        let command = "ps_comment";
        // The chassis echoes the command line with the value appended.
        let echo = target.build_index_command(command, &[&value]);
        prop_assert_eq!(target.extract_return(command, &echo), value);
    }

    #[test]
    fn bracket_suffix_carries_last_segment(target in arb_target()) {
        let line = target.build_index_command("ps_config", &["?"]);
        let sub = target.index.rsplit('/').next().unwrap();
        let bracket = format!("[{sub}]");
        prop_assert!(line.contains(&bracket));
    }

    #[test]
    fn echo_strip_keeps_command_and_value(
        target in arb_target(),
        value in "[a-zA-Z0-9]{1,16}",
    ) {
        let sub = target.index.rsplit('/').next().unwrap();
        let line = format!(
            "{} PS_RATEFRACTION [{sub}] {value}",
            target.index.rsplitn(2, '/').last().unwrap()
        );
        let stripped = target.strip_index_echo(&line);
        prop_assert!(stripped.starts_with("PS_RATEFRACTION"));
        prop_assert!(stripped.ends_with(&value));
    }

    #[test]
    fn id_is_last_segment(target in arb_target()) {
        let sub: u32 = target.index.rsplit('/').next().unwrap().parse().unwrap();
        prop_assert_eq!(target.id(), Some(sub));
    }
}
