use super::*;

#[test]
fn inline_scripts_are_evaluated_once_through_a_fresh_node() -> Result<()> {
    let page = load(
        r#"
        <script type="text/psajs" id="first" data-pagespeed-orig-index="0">window.x=1</script>
        <script type="text/psajs" data-pagespeed-orig-index="1">window.y=window.x+1</script>
        "#,
    )?;
    assert_eq!(page.host().evaluated(), 2);

    let scripts = page.dom().elements_by_tag_name("script");
    let bodies = scripts
        .iter()
        .map(|node| page.dom().text_content(*node))
        .collect::<Vec<_>>();
    assert_eq!(bodies, vec!["window.x=1", "window.y=window.x+1"]);
    for script in &scripts {
        assert_eq!(page.dom().attr(*script, "type"), Some("text/javascript"));
    }
    let first = page.dom().element_by_id("first");
    assert_eq!(first, scripts.first().copied());
    Ok(())
}

#[test]
fn document_write_output_is_spliced_before_the_next_deferred_script() -> Result<()> {
    let page = load(
        r#"
        <script type="text/psajs">document.write('<script>window.z=1<\/script><p id="w">w</p>'); log('first')</script>
        <script type="text/psajs">log('second ' + window.z)</script>
        "#,
    )?;
    assert_eq!(output(&page), vec!["first", "second 1"]);

    let low = page.runner(Tier::Low).logs();
    assert!(low.contains("dw: <script>"));
    assert!(low.contains("handle_dw: "));

    let written = page
        .dom()
        .element_by_id("w")
        .ok_or_else(|| Error::ScriptRuntime("written paragraph missing".into()))?;
    let body = page
        .dom()
        .body()
        .ok_or_else(|| Error::ScriptRuntime("body missing".into()))?;
    let children = page.dom().children(body);
    let written_at = children.iter().position(|node| *node == written);
    let last_script_at = children
        .iter()
        .rposition(|node| page.dom().is_tag(*node, "script"));
    assert!(written_at < last_script_at);
    Ok(())
}

#[test]
fn unterminated_written_script_keeps_the_markup_before_it() -> Result<()> {
    let page = load(
        r#"<script type="text/psajs">document.write('<p id="kept">x</p><script>log("tail")'); probe('kept')</script>"#,
    )?;
    assert_eq!(output(&page), vec!["kept=found", "tail"]);
    assert!(!page.runner(Tier::Low).logs().contains("html parse error"));
    Ok(())
}

#[test]
fn written_external_scripts_run_before_the_rest_of_the_queue() -> Result<()> {
    let page = load_with(
        r#"
        <script type="text/psajs">document.write('<script src="w.js"><\/script>')</script>
        <script type="text/psajs">log('after ' + window.w)</script>
        "#,
        StaticLoader::new().with("w.js", "window.w=7"),
        DeferConfig::default(),
    )?;
    assert_eq!(output(&page), vec!["after 7"]);
    assert_eq!(page.fetched_urls(), ["w.js"]);
    Ok(())
}

#[test]
fn external_script_waits_for_its_trigger_before_continuing() -> Result<()> {
    let page = load_with(
        r#"
        <script type="text/psajs" data-pagespeed-orig-src="a.js"></script>
        <script type="text/psajs">window.b=window.a+1</script>
        "#,
        StaticLoader::new().with("a.js", "window.a=1"),
        DeferConfig::default(),
    )?;
    assert_eq!(page.host().global_number("b"), Some(2));
    assert_eq!(page.fetched_urls(), ["a.js"]);
    assert!(page.runner(Tier::Low).logs().contains("Executed: a.js"));
    assert_eq!(count(&page, "[psa_to_be_deleted]")?, 0);
    Ok(())
}

#[test]
fn a_pending_external_script_stalls_the_queue_with_one_trigger() -> Result<()> {
    let page = load_with(
        r#"
        <script type="text/psajs" data-pagespeed-orig-src="slow.js"></script>
        <script type="text/psajs">window.after=1</script>
        "#,
        StaticLoader::new().with_outcome("slow.js", FetchOutcome::Pending),
        DeferConfig::default(),
    )?;
    assert_eq!(count(&page, "[psa_to_be_deleted]")?, 1);
    assert_eq!(page.host().global("after"), None);
    assert_eq!(page.runner(Tier::Low).state(), RunnerState::ScriptsExecuting);
    assert_eq!(page.ready_state(), ReadyState::Interactive);
    assert!(!page.scripts_are_done());
    Ok(())
}

#[test]
fn failed_external_scripts_count_as_completed() -> Result<()> {
    let page = load(
        r#"
        <script type="text/psajs" data-pagespeed-orig-src="missing.js"></script>
        <script type="text/psajs">window.after=1</script>
        "#,
    )?;
    assert_eq!(page.host().global_number("after"), Some(1));
    assert!(page.runner(Tier::Low).logs().contains("Executed: missing.js"));
    assert!(page.scripts_are_done());
    Ok(())
}

#[test]
fn later_external_scripts_are_prefetched() -> Result<()> {
    let page = load_with(
        r#"
        <head></head>
        <body>
        <script type="text/psajs" data-pagespeed-orig-src="a.js"></script>
        <script type="text/psajs" data-pagespeed-orig-src="b.js"></script>
        </body>
        "#,
        StaticLoader::new().with("a.js", "window.a=1").with("b.js", "window.b=2"),
        DeferConfig::default(),
    )?;
    let preloaded = page
        .dom()
        .elements_by_tag_name("link")
        .into_iter()
        .filter(|link| page.dom().attr(*link, "rel") == Some("preload"))
        .filter_map(|link| page.dom().attr(link, "href").map(str::to_string))
        .collect::<Vec<_>>();
    assert_eq!(preloaded, vec!["b.js"]);
    assert_eq!(page.host().global_number("b"), Some(2));
    Ok(())
}

#[test]
fn an_exception_is_logged_and_replay_continues() -> Result<()> {
    let page = load(
        r#"
        <script type="text/psajs">throw('boom')</script>
        <script type="text/psajs">window.after=1</script>
        "#,
    )?;
    let low = page.runner(Tier::Low).logs();
    assert!(low.contains("Exception while evaluating."));
    assert!(low.contains("boom"));
    assert_eq!(page.host().global_number("after"), Some(1));
    assert!(page.scripts_are_done());
    Ok(())
}

#[test]
fn firefox_replays_inline_scripts_as_data_uris() -> Result<()> {
    let page = load_with(
        r#"
        <script type="text/psajs">window.f=1</script>
        <script type="text/psajs">window.g=window.f+1</script>
        "#,
        StaticLoader::new(),
        DeferConfig {
            user_agent: Some(
                "Mozilla/5.0 (X11; Linux x86_64; rv:99.0) Gecko/20100101 Firefox/99.0".into(),
            ),
            ..DeferConfig::default()
        },
    )?;
    assert_eq!(page.host().global_number("g"), Some(2));
    assert!(page
        .runner(Tier::Low)
        .logs()
        .contains("Add to queue url: data:text/javascript,"));
    assert!(page.fetched_urls().is_empty());
    Ok(())
}

#[test]
fn register_script_tags_is_idempotent() -> Result<()> {
    let mut page = load_with(
        r#"
        <script type="text/prioritypsajs">window.a=1</script>
        <script type="text/prioritypsajs">window.b=2</script>
        "#,
        StaticLoader::new(),
        manual(),
    )?;
    page.register_script_tags(None, None);
    assert_eq!(page.runner(Tier::High).queue().len(), 2);
    assert_eq!(page.runner(Tier::High).state(), RunnerState::ScriptsRegistered);
    page.register_script_tags(None, None);
    assert_eq!(page.runner(Tier::High).queue().len(), 2);
    Ok(())
}

#[test]
fn execute_and_run_do_nothing_before_registration() -> Result<()> {
    let mut page = load_with(
        r#"<script type="text/prioritypsajs">window.a=1</script>"#,
        StaticLoader::new(),
        manual(),
    )?;
    page.execute();
    page.run();
    assert_eq!(page.runner(Tier::High).state(), RunnerState::NotStarted);
    assert_eq!(page.host().global("a"), None);

    page.register_script_tags(None, None);
    page.execute();
    assert_eq!(page.host().global_number("a"), Some(1));
    Ok(())
}

#[test]
fn scripts_are_done_only_at_the_very_end() -> Result<()> {
    let mut page = Page::with_options(
        r#"<script type="text/psajs">window.a=1</script>"#,
        StatementHost::new(),
        StaticLoader::new(),
        manual(),
    )?;
    assert!(!page.scripts_are_done());
    page.register_script_tags(None, None);
    assert!(!page.scripts_are_done());
    page.execute();
    assert_eq!(page.runner(Tier::High).state(), RunnerState::WaitingForOnload);
    assert!(!page.scripts_are_done());
    page.run_until_idle()?;
    assert_eq!(page.host().global_number("a"), Some(1));
    assert!(page.scripts_are_done());
    Ok(())
}

#[test]
fn queued_sources_added_by_hand_run_with_the_tier() -> Result<()> {
    let mut page = Page::with_options(
        "<div></div>",
        StatementHost::new(),
        StaticLoader::new().with("extra.js", "log('url')"),
        manual(),
    )?;
    page.register_script_tags(None, None);
    page.add_str("log('str')");
    page.add_url("extra.js");
    page.execute();
    page.run_until_idle()?;
    assert_eq!(output(&page), vec!["str", "url"]);
    assert!(page.scripts_are_done());
    Ok(())
}
