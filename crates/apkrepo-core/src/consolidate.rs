//! Removal of superseded package versions.
//!
//! A package accumulates one version record per release. A client that can
//! install version N can equally install any newer version with the same
//! applicability (channel, SDK bounds, ABIs, dependencies and any other
//! non-delivery property), so such an N is dropped. Versions whose
//! applicability differs from every newer version are kept: some client
//! constrained to that applicability still needs them.

use std::collections::BTreeMap;

use apkrepo_schema::{ConsolidatedPackageIndex, RedundancySignature, VersionRecord};

use crate::error::Result;

/// Consolidate a package's versions.
///
/// 1. Versions in the `old` channel are dropped outright; they take no part
///    in the comparison.
/// 2. The rest are ordered by version code, whatever the input order.
/// 3. A version is redundant iff some version with a strictly higher code
///    has an equal redundancy signature. Signatures are not monotonic
///    across releases, so every newer version is checked, not just the
///    next one.
/// 4. The non-redundant versions are returned keyed by version code.
///
/// # Errors
///
/// Returns an error if a record cannot be serialized into its signature.
pub fn consolidate<I>(versions: I) -> Result<ConsolidatedPackageIndex>
where
    I: IntoIterator<Item = VersionRecord>,
{
    let mut eligible: Vec<VersionRecord> = versions.into_iter().filter(|v| !v.is_old()).collect();
    eligible.sort_by_key(|v| v.version_code);

    let signatures = eligible
        .iter()
        .map(VersionRecord::redundancy_signature)
        .collect::<std::result::Result<Vec<RedundancySignature>, _>>()?;

    let redundant: Vec<bool> = (0..eligible.len())
        .map(|i| {
            let code = eligible[i].version_code;
            eligible
                .iter()
                .zip(&signatures)
                .skip(i + 1)
                .any(|(newer, sig)| newer.version_code > code && *sig == signatures[i])
        })
        .collect();

    let retained: BTreeMap<_, _> = eligible
        .into_iter()
        .zip(redundant)
        .filter_map(|(version, redundant)| {
            if redundant {
                tracing::debug!("version {} is superseded", version.version_code);
                None
            } else {
                Some((version.version_code, version))
            }
        })
        .collect();

    Ok(ConsolidatedPackageIndex::new(retained))
}

#[cfg(test)]
mod tests {
    use super::*;
    use apkrepo_schema::{
        Abi, ArtifactRecord, ArtifactSet, Channel, PackageName, Sha256Digest, VersionCode,
    };
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn version(code: u64, channel: Channel, abis: &[Abi]) -> VersionRecord {
        VersionRecord {
            version_code: VersionCode::new(code),
            version_name: format!("v{code}"),
            label: Some("Example".into()),
            channel,
            min_sdk: 29,
            max_sdk: None,
            abis: abis.iter().copied().collect(),
            static_deps: vec![],
            deps: vec![],
            description: None,
            release_notes: None,
            extra: Default::default(),
            artifacts: ArtifactSet::new(vec![ArtifactRecord {
                file_name: "base.apk".into(),
                sha256: Sha256Digest::from_bytes([(code % 251) as u8; 32]),
                size: code,
                gz_size: code,
                br_size: code,
            }]),
        }
    }

    /// Signature `A` is stable/arm64, `B` is beta/arm64.
    fn sig(code: u64, which: char) -> VersionRecord {
        match which {
            'A' => version(code, Channel::Stable, &[Abi::Arm64V8a]),
            'B' => version(code, Channel::Beta, &[Abi::Arm64V8a]),
            'C' => version(code, Channel::Alpha, &[Abi::X86_64]),
            _ => unreachable!(),
        }
    }

    fn codes(index: &ConsolidatedPackageIndex) -> Vec<u64> {
        index.version_codes().into_iter().map(VersionCode::get).collect()
    }

    #[test]
    fn older_duplicate_is_dropped() {
        let out = consolidate(vec![sig(1, 'A'), sig(2, 'A'), sig(3, 'B')]).unwrap();
        assert_eq!(codes(&out), vec![2, 3]);
    }

    #[test]
    fn scenario_abi_change_keeps_both() {
        let out = consolidate(vec![
            version(10, Channel::Stable, &[Abi::Arm64V8a]),
            version(11, Channel::Stable, &[Abi::Arm64V8a]),
            version(12, Channel::Stable, &[Abi::Arm64V8a, Abi::ArmeabiV7a]),
        ])
        .unwrap();
        assert_eq!(codes(&out), vec![11, 12]);
    }

    #[test]
    fn all_equal_keeps_only_highest() {
        let out = consolidate((1..=5).map(|c| sig(c, 'A'))).unwrap();
        assert_eq!(codes(&out), vec![5]);
    }

    #[test]
    fn all_distinct_keeps_everything() {
        let out = consolidate(vec![sig(1, 'A'), sig(2, 'B'), sig(3, 'C')]).unwrap();
        assert_eq!(codes(&out), vec![1, 2, 3]);
    }

    #[test]
    fn non_adjacent_match_is_found() {
        // A B A: the first A is superseded by the third even though B sits
        // in between
        let out = consolidate(vec![sig(1, 'A'), sig(2, 'B'), sig(3, 'A')]).unwrap();
        assert_eq!(codes(&out), vec![2, 3]);
    }

    #[test]
    fn old_channel_is_excluded_and_inert() {
        let mut old = sig(2, 'A');
        old.channel = Channel::Old;
        let out = consolidate(vec![sig(1, 'A'), old]).unwrap();
        assert_eq!(codes(&out), vec![1]);

        // an old version with an otherwise equal signature does not mark the
        // older stable one redundant, and never appears itself
        let mut old_a = sig(5, 'B');
        old_a.channel = Channel::Old;
        let mut old_b = sig(6, 'B');
        old_b.channel = Channel::Old;
        let out = consolidate(vec![old_a, old_b]).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn empty_input_is_empty_index() {
        let out = consolidate(Vec::new()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn delivery_fields_do_not_block_supersession() {
        let mut older = sig(1, 'A');
        older.description = Some("first release".into());
        older.release_notes = Some("initial".into());
        let out = consolidate(vec![older, sig(2, 'A')]).unwrap();
        assert_eq!(codes(&out), vec![2]);
    }

    #[test]
    fn dependency_change_keeps_older() {
        let mut newer = sig(2, 'A');
        newer.deps = vec![PackageName::new("com.example.lib")];
        let out = consolidate(vec![sig(1, 'A'), newer]).unwrap();
        assert_eq!(codes(&out), vec![1, 2]);
    }

    #[test]
    fn retained_records_are_untouched() {
        let input = sig(7, 'C');
        let out = consolidate(vec![input.clone()]).unwrap();
        assert_eq!(out.get(VersionCode::new(7)), Some(&input));
    }

    #[test]
    fn consolidation_is_idempotent() {
        let input = vec![sig(1, 'A'), sig(2, 'B'), sig(3, 'A'), sig(4, 'C'), sig(5, 'B')];
        let once = consolidate(input).unwrap();
        let twice = consolidate(once.iter().map(|(_, v)| v.clone())).unwrap();
        assert_eq!(once, twice);
    }

    fn arb_versions() -> impl Strategy<Value = Vec<VersionRecord>> {
        prop::collection::btree_map(0u64..200, 0usize..4, 0..24).prop_map(|picks| {
            picks
                .into_iter()
                .map(|(code, kind)| match kind {
                    0 => sig(code, 'A'),
                    1 => sig(code, 'B'),
                    2 => sig(code, 'C'),
                    _ => version(code, Channel::Old, &[Abi::X86]),
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn insertion_order_does_not_matter(
            versions in arb_versions(),
            seed in any::<u64>(),
        ) {
            let mut shuffled = versions.clone();
            // deterministic permutation driven by the seed
            let len = shuffled.len();
            for i in 0..len {
                let j = ((seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(i as u64)) % len as u64) as usize;
                shuffled.swap(i, j);
            }
            prop_assert_eq!(consolidate(versions).unwrap(), consolidate(shuffled).unwrap());
        }

        #[test]
        fn retained_signatures_are_unique_and_latest(versions in arb_versions()) {
            let out = consolidate(versions.clone()).unwrap();
            let sigs: Vec<_> = out.iter().map(|(_, v)| v.redundancy_signature().unwrap()).collect();
            for (i, a) in sigs.iter().enumerate() {
                for b in &sigs[i + 1..] {
                    prop_assert_ne!(a, b);
                }
            }
            let old: BTreeSet<_> = versions.iter().filter(|v| v.is_old()).map(|v| v.version_code).collect();
            for code in out.version_codes() {
                prop_assert!(!old.contains(&code));
            }
        }
    }
}
