use defer_js::{
    DeferConfig, Document, EventTarget, FetchOutcome, Invocation, Listener, Page, ReadyState,
    Result, RunnerState, ScriptHost, ScriptOrigin, StatementHost, StaticLoader, Tier,
};

const REWRITTEN_PAGE: &str = r#"<!doctype html>
<html>
<head>
  <title>rewritten</title>
  <script>log('head inline')</script>
  <script type="text/prioritypsajs" data-pagespeed-orig-src="lib.js" data-pagespeed-orig-index="0"></script>
</head>
<body>
  <div id="banner"></div>
  <script type="text/psajs" data-pagespeed-orig-index="1">document.write('<div id="ad">' + window.lib + '</div>'); log('ad slot')</script>
  <p id="content">content</p>
  <script type="text/psajs" data-pagespeed-orig-src="widget.js" data-pagespeed-orig-index="2"></script>
  <img data-pagespeed-onload="log('image ready')" data-pagespeed-loaded="1">
  <script type="text/psajs" data-pagespeed-orig-index="3">probe('content'); probe('footer')</script>
  <div id="footer"></div>
</body>
</html>
"#;

/// Records where every evaluated source came from.
#[derive(Debug, Default)]
struct OriginHost {
    inner: StatementHost,
    origins: Vec<ScriptOrigin>,
}

impl ScriptHost for OriginHost {
    fn evaluate(&mut self, invocation: &Invocation<'_>, doc: &mut Document<'_>) -> Result<()> {
        self.origins.push(invocation.origin.clone());
        self.inner.evaluate(invocation, doc)
    }

    fn compile(&mut self, source: &str) -> Result<()> {
        self.inner.compile(source)
    }
}

fn rewritten_page_loader() -> StaticLoader {
    StaticLoader::new()
        .with("lib.js", "window.lib='v1'; log('lib')")
        .with("widget.js", "log('widget ' + window.lib)")
}

#[test]
fn rewritten_page_replays_like_the_unrewritten_one() -> Result<()> {
    let mut page = Page::with_options(
        REWRITTEN_PAGE,
        OriginHost::default(),
        rewritten_page_loader(),
        DeferConfig::default(),
    )?;
    page.run_until_idle()?;

    assert_eq!(
        page.host().inner.output(),
        [
            "head inline",
            "lib",
            "ad slot",
            "widget v1",
            "content=found",
            "footer=null",
            "image ready",
        ]
    );
    assert!(page.scripts_are_done());
    assert_eq!(page.ready_state(), ReadyState::Complete);
    assert_eq!(page.fetched_urls(), ["lib.js", "widget.js"]);

    let ad = page.dom().element_by_id("ad");
    assert!(ad.is_some_and(|ad| page.dom().text_content(ad) == "v1"));

    let external = page
        .host()
        .origins
        .iter()
        .filter_map(|origin| match origin {
            ScriptOrigin::External(url) if !url.starts_with("data:") => Some(url.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(external, ["lib.js", "widget.js"]);
    Ok(())
}

#[test]
fn both_tiers_report_their_progress() -> Result<()> {
    let mut page = Page::with_options(
        REWRITTEN_PAGE,
        StatementHost::new(),
        rewritten_page_loader(),
        DeferConfig::default(),
    )?;
    assert_eq!(page.active_tier(), Tier::High);
    assert_eq!(page.runner(Tier::High).state(), RunnerState::ScriptsExecuting);

    page.run_until_idle()?;
    let high = page.runner(Tier::High).logs();
    assert!(high.contains("Add to queue url: lib.js"));
    assert!(high.contains("Executed: lib.js"));
    let low = page.runner(Tier::Low).logs();
    assert!(low.contains("Firing Event: BeforeScripts"));
    assert!(low.contains("Firing Event: AfterScripts"));
    assert!(low.contains("Evaluated: probe('content'); probe('footer')"));
    Ok(())
}

#[test]
fn hanging_high_priority_script_keeps_the_page_loading() -> Result<()> {
    let mut page = Page::with_options(
        REWRITTEN_PAGE,
        StatementHost::new(),
        rewritten_page_loader().with_outcome("lib.js", FetchOutcome::Pending),
        DeferConfig::default(),
    )?;
    page.run_until_idle()?;
    assert_eq!(page.host().output(), ["head inline"]);
    assert_eq!(page.ready_state(), ReadyState::Loading);
    assert_eq!(page.runner(Tier::Low).state(), RunnerState::NotStarted);
    Ok(())
}

#[test]
fn embedder_driven_replay_with_callbacks() -> Result<()> {
    let config = DeferConfig::from_json(r#"{"auto_start": false, "log_limit": 50}"#)?;
    let mut page = Page::with_options(
        REWRITTEN_PAGE,
        StatementHost::new(),
        rewritten_page_loader(),
        config,
    )?;
    page.run_until_idle()?;
    assert_eq!(page.ready_state(), ReadyState::Complete);
    assert!(!page.defer_js_started());

    page.add_after_defer_run_function(Listener::callback(|doc, event| {
        assert_eq!(event.current_target, EventTarget::Window);
        let banner = doc.get_element_by_id("banner")?;
        if let Some(banner) = banner {
            doc.set_attribute(banner, "data-replayed", "yes")?;
        }
        Ok(())
    }));
    page.start_defer_js();
    page.run_until_idle()?;

    assert!(page.scripts_are_done());
    let banner = page.dom().element_by_id("banner");
    assert!(banner.is_some_and(|node| page.dom().attr(node, "data-replayed") == Some("yes")));
    assert!(page.runner(Tier::Low).logs().len() <= 50);
    Ok(())
}
