use super::*;

fn experimental() -> DeferConfig {
    DeferConfig {
        experimental: true,
        auto_start: false,
        ..DeferConfig::default()
    }
}

const THREE_SCRIPTS: &str = r#"
    <script type="text/psajs" data-pagespeed-orig-index="0">log('s0')</script>
    <script type="text/psajs" data-pagespeed-orig-index="1">log('s1')</script>
    <script type="text/psajs" data-pagespeed-orig-index="2">log('s2')</script>
"#;

#[test]
fn batches_run_up_to_the_last_index_then_the_rest() -> Result<()> {
    let mut page = Page::with_options(
        THREE_SCRIPTS,
        StatementHost::new(),
        StaticLoader::new(),
        experimental(),
    )?;
    assert!(page.is_experimental_mode());

    page.register_script_tags(Some(Listener::script("log('batch done')")), Some(1));
    page.execute();
    assert_eq!(page.runner(Tier::High).state(), RunnerState::WaitingForNextRun);
    page.run_until_idle()?;
    assert_eq!(output(&page), vec!["s0", "s1", "batch done"]);
    assert_eq!(page.runner(Tier::Low).state(), RunnerState::WaitingForNextRun);
    assert_eq!(page.active_tier(), Tier::High);
    assert!(!page.scripts_are_done());

    page.register_script_tags(None, None);
    page.execute();
    page.run_until_idle()?;
    assert_eq!(output(&page), vec!["s0", "s1", "batch done", "s2"]);
    assert!(page.scripts_are_done());
    assert!(!page.runner(Tier::Low).logs().contains("Executing a script twice"));
    Ok(())
}

#[test]
fn before_scripts_fires_only_for_the_first_batch() -> Result<()> {
    let mut page = Page::with_options(
        THREE_SCRIPTS,
        StatementHost::new(),
        StaticLoader::new(),
        experimental(),
    )?;
    page.add_before_defer_run_function(Listener::script("log('before')"));
    page.register_script_tags(Some(Listener::script("log('batch done')")), Some(1));
    page.execute();
    page.run_until_idle()?;
    page.add_before_defer_run_function(Listener::script("log('before again')"));
    page.register_script_tags(None, None);
    page.execute();
    page.run_until_idle()?;
    assert_eq!(
        output(&page),
        vec!["before", "s0", "s1", "batch done", "s2"]
    );
    Ok(())
}

#[test]
fn scripts_registered_again_after_their_batch_are_reported() -> Result<()> {
    let mut page = Page::with_options(
        THREE_SCRIPTS,
        StatementHost::new(),
        StaticLoader::new(),
        experimental(),
    )?;
    // The batch callback adds a placeholder that claims an already replayed index.
    let reinsert = Listener::callback(|doc, _| {
        let script = doc.create_element("script")?;
        doc.set_attribute(script, "type", PSA_SCRIPT_TYPE)?;
        doc.set_attribute(script, PSA_ORIG_INDEX, "0")?;
        doc.set_text(script, "log('again')")?;
        let body = doc
            .body()
            .ok_or_else(|| Error::ScriptRuntime("body missing".into()))?;
        doc.append_child(body, script)
    });
    page.register_script_tags(Some(reinsert), Some(1));
    page.execute();
    page.run_until_idle()?;

    page.register_script_tags(None, None);
    page.execute();
    page.run_until_idle()?;
    assert!(page
        .runner(Tier::Low)
        .logs()
        .contains("Executing a script twice. Orig_Index: 0"));
    assert_eq!(output(&page), vec!["s0", "s1", "s2", "again"]);
    Ok(())
}

#[test]
fn callbacks_run_at_once_outside_experimental_mode() -> Result<()> {
    let mut page = Page::with_options(
        THREE_SCRIPTS,
        StatementHost::new(),
        StaticLoader::new(),
        manual(),
    )?;
    page.register_script_tags(Some(Listener::script("log('callback')")), Some(1));
    assert_eq!(output(&page), vec!["callback"]);
    assert_eq!(page.runner(Tier::High).state(), RunnerState::NotStarted);
    Ok(())
}
