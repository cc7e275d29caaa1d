//! Universal properties of repair.

use patch_backport::{parse_patch, repair};
use proptest::prelude::*;

fn file_lines(len: usize) -> Vec<String> {
    (0..len).map(|n| format!("\tcall_{n}(ctx, {n});")).collect()
}

proptest! {
    #[test]
    fn prop_repaired_header_matches_body(
        start in 0usize..20,
        removed in 0usize..3,
        added in 0usize..4,
        claimed_start in 1usize..40,
        force in any::<bool>(),
    ) {
        let lines = file_lines(30);
        let mut unit = format!(
            "--- a/src/f.c\n+++ b/src/f.c\n@@ -{claimed_start},99 +{claimed_start},99 @@\n"
        );
        for line in &lines[start..start + 3] {
            unit.push_str(&format!(" {line}\n"));
        }
        for line in &lines[start + 3..start + 3 + removed] {
            unit.push_str(&format!("-{line}\n"));
        }
        for n in 0..added {
            unit.push_str(&format!("+\tnew_call_{n}();\n"));
        }
        for line in &lines[start + 3 + removed..start + 6 + removed] {
            unit.push_str(&format!(" {line}\n"));
        }

        let repaired = repair(&unit, |_| Some(lines.clone()), force);
        let blocks = parse_patch(&repaired.text).unwrap();
        prop_assert_eq!(blocks.len(), 1);
        for hunk in &blocks[0].hunks {
            prop_assert_eq!(hunk.header.old_count, hunk.old_lines().len());
            prop_assert_eq!(hunk.header.new_count, hunk.new_lines().len());
            prop_assert_eq!(hunk.header.old_start, start + 1);
        }
    }
}
