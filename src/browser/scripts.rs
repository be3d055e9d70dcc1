//! Page scripts executed through `BrowserDriver::execute_script`

/// True once the document has a body to work with
pub const DOCUMENT_READY: &str = "return document.readyState !== 'loading' && document.body !== null;";

/// Player state of the first `<video>`, or null when there is none.
/// An unknown duration (NaN) arrives as null.
pub const PLAYER_STATE: &str = r#"
var v = document.querySelector('video');
if (!v) { return null; }
return {
    position: isFinite(v.currentTime) ? v.currentTime : null,
    duration: isFinite(v.duration) ? v.duration : null,
    paused: v.paused
};
"#;

/// Resource timing entry names since the last read; the buffer is cleared
pub const HARVEST_RESOURCES: &str = r#"
var entries = window.performance.getEntriesByType('resource');
window.performance.clearResourceTimings();
return entries.map(function (e) { return e.name; });
"#;

/// Script-level play on the first `<video>`; a rejected play promise is ignored
pub const PLAY_VIDEO: &str = r#"
var v = document.querySelector('video');
if (!v) { return false; }
var p = v.play();
if (p && p.catch) { p.catch(function () {}); }
return true;
"#;

/// Whether the video in the current browsing context is running
pub const VIDEO_RUNNING: &str = r#"
var v = document.querySelector('video');
if (v) { return !v.paused && v.currentTime > 0; }
return false;
"#;

pub const CLICK_ELEMENT: &str = "arguments[0].click();";

pub const REMOVE_ELEMENT: &str = "arguments[0].remove();";

pub const IS_DISPLAYED: &str = r#"
var e = arguments[0];
if (!e || !e.isConnected) { return false; }
var s = window.getComputedStyle(e);
if (s.display === 'none' || s.visibility === 'hidden') { return false; }
var r = e.getBoundingClientRect();
return r.width > 0 && r.height > 0;
"#;

/// The document's own body element
pub const MAIN_BODY: &str = "return document.body;";

/// Whether the element is, or contains, the `<video>`
pub const CONTAINS_VIDEO: &str = r#"
var e = arguments[0];
return e.tagName === 'VIDEO' || e.querySelector('video') !== null;
"#;

/// Covering-layer heuristic for a single element: inline z-index above 100,
/// or fixed/absolute positioning over more than 80 % of the viewport
pub const IS_COVERING_LAYER: &str = r#"
var e = arguments[0];
var s = window.getComputedStyle(e);
var inline = e.getAttribute('style') || '';
var z = parseInt(s.zIndex, 10);
if (inline.indexOf('z-index') !== -1 && z > 100) { return true; }
if (s.position === 'fixed' || s.position === 'absolute') {
    var r = e.getBoundingClientRect();
    return r.width > window.innerWidth * 0.8 && r.height > window.innerHeight * 0.8;
}
return false;
"#;

/// Visible block elements matching the covering-layer heuristic that do not hold the video
pub const FIND_COVERING_LAYERS: &str = r#"
var video = document.querySelector('video');
var found = [];
var nodes = document.querySelectorAll('div, section, aside');
for (var i = 0; i < nodes.length; i++) {
    var e = nodes[i];
    if (video && e.contains(video)) { continue; }
    var s = window.getComputedStyle(e);
    if (s.display === 'none' || s.visibility === 'hidden') { continue; }
    var inline = e.getAttribute('style') || '';
    var z = parseInt(s.zIndex, 10);
    var covering = inline.indexOf('z-index') !== -1 && z > 100;
    if (!covering && (s.position === 'fixed' || s.position === 'absolute')) {
        var r = e.getBoundingClientRect();
        covering = r.width > window.innerWidth * 0.8 && r.height > window.innerHeight * 0.8;
    }
    if (covering) { found.push(e); }
}
return found;
"#;

pub const ELEMENT_SRC: &str = "return arguments[0].getAttribute('src') || '';";
