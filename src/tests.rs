use super::*;

mod incremental;
mod ordering;

fn load(html: &str) -> Result<Page<StatementHost>> {
    load_with(html, StaticLoader::new(), DeferConfig::default())
}

fn load_with(
    html: &str,
    loader: StaticLoader,
    config: DeferConfig,
) -> Result<Page<StatementHost>> {
    let mut page = Page::with_options(html, StatementHost::new(), loader, config)?;
    page.run_until_idle()?;
    Ok(page)
}

fn manual() -> DeferConfig {
    DeferConfig {
        auto_start: false,
        ..DeferConfig::default()
    }
}

fn output(page: &Page<StatementHost>) -> Vec<&str> {
    page.host().output().iter().map(String::as_str).collect()
}

fn count(page: &Page<StatementHost>, selector: &str) -> Result<usize> {
    Ok(page.dom().query_selector_all(selector)?.len())
}

#[test]
fn deferred_scripts_run_in_document_order() -> Result<()> {
    let page = load(
        r#"
        <script type="text/psajs" data-pagespeed-orig-index="0">window.x=1</script>
        <script type="text/psajs" data-pagespeed-orig-index="1">window.y=window.x+1</script>
        "#,
    )?;
    assert_eq!(page.host().global_number("y"), Some(2));
    assert!(page.scripts_are_done());
    assert_eq!(page.active_tier(), Tier::Low);
    assert_eq!(page.runner(Tier::High).state(), RunnerState::ScriptsDone);
    assert_eq!(page.runner(Tier::Low).state(), RunnerState::ScriptsDone);
    Ok(())
}

#[test]
fn high_priority_scripts_run_synchronously_at_dom_content_loaded() -> Result<()> {
    let mut page = Page::with_options(
        r#"
        <script type="text/prioritypsajs">window.x=1</script>
        <script type="text/psajs">window.y=window.x+1</script>
        "#,
        StatementHost::new(),
        StaticLoader::new(),
        DeferConfig::default(),
    )?;
    assert!(page.defer_js_started());
    assert_eq!(page.host().global_number("x"), Some(1));
    assert_eq!(page.host().global_number("y"), None);
    assert_eq!(page.runner(Tier::High).state(), RunnerState::WaitingForOnload);
    assert_eq!(page.runner(Tier::Low).state(), RunnerState::NotStarted);
    assert!(!page.scripts_are_done());

    page.run_until_idle()?;
    assert_eq!(page.host().global_number("y"), Some(2));
    assert!(page.scripts_are_done());
    Ok(())
}

#[test]
fn placeholders_and_bookkeeping_nodes_are_gone_after_replay() -> Result<()> {
    let page = load_with(
        r#"
        <div id="a"></div>
        <script type="text/psajs" data-pagespeed-orig-src="a.js"></script>
        <script type="text/psajs">window.done=1</script>
        "#,
        StaticLoader::new().with("a.js", "window.a=1"),
        DeferConfig::default(),
    )?;
    assert_eq!(page.host().global_number("done"), Some(1));
    assert_eq!(count(&page, "script[type='text/psajs']")?, 0);
    assert_eq!(count(&page, "[psa_to_be_deleted]")?, 0);
    assert_eq!(count(&page, "[psa_current_node]")?, 0);
    assert_eq!(count(&page, "psanode")?, 0);
    assert_eq!(count(&page, "[psa_not_processed]")?, 0);
    assert_eq!(count(&page, "[priority_psa_not_processed]")?, 0);
    Ok(())
}

#[test]
fn event_loop_step_limit_is_enforced() -> Result<()> {
    let mut page = Page::with_options(
        r#"<script type="text/psajs" data-pagespeed-orig-src="a.js"></script>"#,
        StatementHost::new(),
        StaticLoader::new().with("a.js", "window.a=1"),
        DeferConfig::default(),
    )?;
    assert!(page.set_task_step_limit(0).is_err());
    page.set_task_step_limit(1)?;
    match page.run_until_idle() {
        Err(Error::ScriptRuntime(message)) => {
            assert!(message.contains("event loop exceeded max task steps"));
        }
        other => panic!("expected step limit error, got: {other:?}"),
    }
    Ok(())
}
