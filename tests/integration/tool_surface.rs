//! The text tool surface over an in-memory repository.

use patch_backport::{Backporter, HunkStatus, JobRefs, MemoryRepository, Phase, Pipeline};

fn numbered(count: usize) -> String {
    (1..=count).map(|n| format!("int v{n} = {n};\n")).collect()
}

fn refs() -> JobRefs {
    JobRefs {
        commit: "fix".to_string(),
        origin: "v2".to_string(),
        target: "v1".to_string(),
    }
}

fn backporter(repo: MemoryRepository) -> Backporter<MemoryRepository> {
    Backporter::new(repo, refs(), Pipeline::default())
}

/// Changes `int v6` in a hunk whose header claims it starts at line 1.
const SHIFTED: &str = concat!(
    "--- a/src/x.c\n",
    "+++ b/src/x.c\n",
    "@@ -1,7 +1,7 @@\n",
    " int v3 = 3;\n",
    " int v4 = 4;\n",
    " int v5 = 5;\n",
    "-int v6 = 6;\n",
    "+int v6 = 60;\n",
    " int v7 = 7;\n",
    " int v8 = 8;\n",
    " int v9 = 9;\n",
);

#[test]
fn test_shifted_header_is_corrected() {
    let repo = MemoryRepository::new().with_file("v1", "src/x.c", &numbered(12));
    let mut bp = backporter(repo);

    let out = bp.validate("v1", SHIFTED).unwrap();
    assert!(out.contains("Patch applied successfully."), "{out}");
    assert!(bp.session().round_succeeded);
    assert_eq!(bp.session().succeeded_patches.len(), 1);
    assert!(bp.session().succeeded_patches[0].contains("@@ -3,7 +3,7 @@"));
}

#[test]
fn test_renamed_file_is_followed() {
    let repo = MemoryRepository::new()
        .with_file("v1", "lib/x.c", &numbered(12))
        .with_rename("src/x.c", "lib/x.c");
    let mut bp = backporter(repo);

    let out = bp.validate("v1", SHIFTED).unwrap();
    assert!(out.contains("Patch applied successfully."), "{out}");
    assert!(out.contains("src/x.c has been moved to lib/x.c"));
    assert!(bp.session().succeeded_patches[0].starts_with("--- a/lib/x.c\n+++ b/lib/x.c\n"));
}

#[test]
fn test_third_mismatch_forces_context_rewrite() {
    let drifted = numbered(12).replace("int v4 = 4;", "long v4 = 4;");
    let repo = MemoryRepository::new().with_file("v1", "src/x.c", &drifted);
    let mut bp = backporter(repo);

    let first = bp.validate("v1", SHIFTED).unwrap();
    assert!(first.contains("CONTEXT MISMATCH"), "{first}");
    assert!(first.contains("long v4 = 4;"));
    assert_eq!(bp.session().mismatch_count, 1);

    let second = bp.validate("v1", SHIFTED).unwrap();
    assert!(second.contains("already submitted"));
    assert!(second.contains("CONTEXT MISMATCH"));
    assert_eq!(bp.session().mismatch_count, 2);

    let third = bp.validate("v1", SHIFTED).unwrap();
    assert!(third.contains("Patch applied successfully."), "{third}");
    assert!(bp.session().succeeded_patches[0].contains(" long v4 = 4;\n"));
}

#[test]
fn test_need_not_ported_ignores_repository_state() {
    let mut bp = backporter(MemoryRepository::new());
    let out = bp.validate("no-such-ref", "need not ported").unwrap();
    assert_eq!(out, "Patch applied successfully.\n");
    assert!(bp.session().round_succeeded);
    assert!(bp.session().succeeded_patches.is_empty());
}

fn fix_commit() -> String {
    format!(
        "commit 1234abcd\nAuthor: Dev <dev@example.com>\n\n    fix overflow\n\n\
         diff --git a/src/x.c b/src/x.c\n{SHIFTED}\
         diff --git a/src/y.c b/src/y.c\n\
         --- a/src/y.c\n+++ b/src/y.c\n\
         @@ -2,7 +2,7 @@\n int v2 = 2;\n int v3 = 3;\n int v4 = 4;\n-int v5 = 5;\n+int v5 = 50;\n int v6 = 6;\n int v7 = 7;\n int v8 = 8;\n"
    )
}

#[test]
fn test_initial_pass_lands_everything_and_validates() {
    let repo = MemoryRepository::new()
        .with_file("v1", "src/x.c", &numbered(12))
        .with_file("v1", "src/y.c", &numbered(10))
        .with_commit("fix", &fix_commit());
    let mut bp = backporter(repo);

    let pass = bp.run_initial_pass().unwrap();
    assert_eq!(pass.statuses, vec![HunkStatus::Applied, HunkStatus::Applied]);
    assert_eq!(bp.units().len(), 2);
    assert!(bp.units()[0].contains("fix overflow"));

    let validation = pass.validation.unwrap();
    assert!(validation.contains("COMPILED"));
    assert!(bp.session().is_finished());
    assert_eq!(bp.session().phase(), Phase::WholePatch);
    assert_eq!(bp.session().succeeded_patches.len(), 1);
}

#[test]
fn test_pending_hunk_is_revised_then_completed() {
    let drifted = numbered(10).replace("int v3 = 3;", "static int v3 = 3;");
    let repo = MemoryRepository::new()
        .with_file("v1", "src/x.c", &numbered(12))
        .with_file("v1", "src/y.c", &drifted)
        .with_commit("fix", &fix_commit());
    let mut bp = backporter(repo);

    let pass = bp.run_initial_pass().unwrap();
    assert_eq!(pass.statuses[0], HunkStatus::Applied);
    let pending: Vec<_> = pass.pending().collect();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0, 1);
    assert!(pending[0].1.contains("CONTEXT MISMATCH"));
    assert!(pass.validation.is_none());

    assert!(bp.begin_hunk(1).is_some());
    let revised = "--- a/src/y.c\n+++ b/src/y.c\n\
                   @@ -2,7 +2,7 @@\n int v2 = 2;\n static int v3 = 3;\n int v4 = 4;\n-int v5 = 5;\n+int v5 = 50;\n int v6 = 6;\n int v7 = 7;\n int v8 = 8;\n";
    let out = bp.validate("v1", revised).unwrap();
    assert!(out.contains("Patch applied successfully."), "{out}");

    let out = bp.complete().unwrap();
    assert!(out.contains("no longer TRIGGERS"), "{out}");
    assert!(bp.session().is_finished());
    let patch = bp.session().complete_patch();
    assert!(patch.contains("+int v6 = 60;"));
    assert!(patch.contains("+int v5 = 50;"));
}

#[test]
fn test_whole_patch_phase_reports_failing_hunk() {
    let repo = MemoryRepository::new().with_file("v1", "src/x.c", &numbered(12));
    let mut bp = backporter(repo);

    let out = bp.complete().unwrap();
    assert!(out.contains("no hunks"), "{out}");
    assert_eq!(bp.session().phase(), Phase::WholePatch);

    let both = format!(
        "{SHIFTED}\n--- a/src/gone.c\n+++ b/src/gone.c\n\
         @@ -2,3 +2,3 @@\n int g2;\n-int g3;\n+long g3;\n int g4;\n"
    );
    let out = bp.validate("v1", &both).unwrap();
    assert!(out.contains("hunk 1 does not apply"), "{out}");
    assert!(!bp.session().compiled);
}

const LINE_LOG: &str = concat!(
    "abc1234 move helpers\n",
    "\n",
    "diff --git a/src/y.c b/src/y.c\n",
    "--- a/src/y.c\n",
    "+++ b/src/y.c\n",
    "@@ -1,1 +1,4 @@\n",
    " int v1 = 1;\n",
    "+int v2 = 2;\n",
    "+int v3 = 3;\n",
    "+int v4 = 4;\n",
);

const SHOW: &str = concat!(
    "commit abc1234\n",
    "\n",
    "    move helpers\n",
    "\n",
    "diff --git a/src/old.c b/src/old.c\n",
    "--- a/src/old.c\n",
    "+++ b/src/old.c\n",
    "@@ -20,5 +20,1 @@\n",
    " int keep;\n",
    "-int v2 = 2;\n",
    "-int v3 = 3;\n",
    "-int v4 = 4;\n",
    "-int tail;\n",
);

#[test]
fn test_history_then_show_finds_previous_location() {
    let unrelated: String = (1..=12).map(|n| format!("char c{n};\n")).collect();
    let repo = MemoryRepository::new()
        .with_file("v1", "src/x.c", &unrelated)
        .with_file("v1", "src/old.c", &numbered(3))
        .with_commit("fix", &fix_commit())
        .with_line_log("src/y.c", LINE_LOG)
        .with_show("abc1234", SHOW, " src/old.c | 4 ----\n src/y.c | 3 +++\n");
    let mut bp = backporter(repo);
    let pass = bp.run_initial_pass().unwrap();
    assert!(matches!(pass.statuses[1], HunkStatus::Pending { .. }));

    assert!(bp.show().contains("run history"));
    let _ = bp.begin_hunk(1);
    let history = bp.history();
    assert!(history.contains("abc1234 move helpers"));

    let show = bp.show();
    assert!(show.contains("src/old.c | 4"), "{show}");
    assert!(show.contains("src/old.c around lines 21 to 24"), "{show}");
    assert!(show.contains("int v3 = 3;"));
}
