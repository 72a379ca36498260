// ============================================================================
// tray.rs — Shell notification area icons (Windows)
// ============================================================================
//
// One tray icon per configured destination. The watcher thread reports new
// icons through the event loop proxy; the loop reloads the matching tray
// icons. If a fresh .ico cannot be loaded the previous image stays up.
// Only conversions made by this process trigger a reload; .ico files edited
// by other programs are picked up on the next conversion or restart.
//
// Context menu: "Regenerate icons" / "Quit". Double-clicking an icon quits.
// ============================================================================

use std::path::{Path, PathBuf};

use anyhow::anyhow;
use tao::event::{Event, StartCause};
use tao::event_loop::{ControlFlow, EventLoopBuilder};
use tray_icon::menu::{Menu, MenuEvent, MenuItem, PredefinedMenuItem};
use tray_icon::{Icon, MouseButton, MouseButtonState, TrayIcon, TrayIconBuilder, TrayIconEvent};

use crate::config::{Config, IconConfig};
use crate::icon::{read_icon_with_retry, LOAD_ATTEMPTS};
use crate::report;
use crate::watcher::{IconUpdate, SourceWatcher, WatchHandle};

const PREFERRED_SIZE: u32 = 32;
const MENU_REGENERATE: &str = "regenerate";
const MENU_QUIT: &str = "quit";

#[derive(Debug)]
enum UserEvent {
    IconUpdated(IconUpdate),
    Tray(TrayIconEvent),
    Menu(MenuEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Regenerate,
    Quit,
}

fn menu_action(id: &str) -> Option<Action> {
    match id {
        MENU_REGENERATE => Some(Action::Regenerate),
        MENU_QUIT => Some(Action::Quit),
        _ => None,
    }
}

struct TrayEntry {
    dst: PathBuf,
    tray: TrayIcon,
}

fn load_tray_icon(path: &Path) -> anyhow::Result<Icon> {
    let pixels = read_icon_with_retry(path, PREFERRED_SIZE, LOAD_ATTEMPTS)?;
    Icon::from_rgba(pixels.rgba, pixels.width, pixels.height)
        .map_err(|e| anyhow!("Bad icon data in {}: {}", path.display(), e))
}

fn build_menu() -> anyhow::Result<Menu> {
    let menu = Menu::new();
    menu.append(&MenuItem::with_id(MENU_REGENERATE, "Regenerate icons", true, None))?;
    menu.append(&PredefinedMenuItem::separator())?;
    menu.append(&MenuItem::with_id(MENU_QUIT, "Quit", true, None))?;
    Ok(menu)
}

fn create_entry(index: usize, icon: &IconConfig) -> anyhow::Result<TrayEntry> {
    let image = load_tray_icon(&icon.dst)?;
    let tray = TrayIconBuilder::new()
        .with_id(format!("icon-{}", index))
        .with_tooltip(icon.tooltip())
        .with_icon(image)
        .with_menu(Box::new(build_menu()?))
        .with_menu_on_left_click(false)
        .build()?;
    Ok(TrayEntry {
        dst: icon.dst.clone(),
        tray,
    })
}

/// Reloads the tray icons showing `update.dst`. A destination that had no
/// usable icon at startup gets its tray entry now.
fn refresh(entries: &mut Vec<TrayEntry>, config: &Config, update: &IconUpdate) {
    if !entries.iter().any(|e| e.dst == update.dst) {
        for (i, icon) in config.icons_with_dst(&update.dst) {
            match create_entry(i, icon) {
                Ok(entry) => {
                    report::info(format!("Tray icon added for {}", icon.dst.display()));
                    entries.push(entry);
                }
                Err(e) => report::warn(format!("Still no tray icon for {}: {}", icon.dst.display(), e)),
            }
        }
        return;
    }

    for entry in entries.iter().filter(|e| e.dst == update.dst) {
        match load_tray_icon(&entry.dst) {
            Ok(image) => {
                if let Err(e) = entry.tray.set_icon(Some(image)) {
                    report::warn(format!("Failed to update tray icon: {}", e));
                } else {
                    report::detail(format!("Tray icon updated from {}", entry.dst.display()));
                }
            }
            Err(e) => report::warn(format!("Keeping previous tray icon: {}", e)),
        }
    }
}

fn shutdown(handle: &mut Option<WatchHandle>, entries: &mut Vec<TrayEntry>) {
    if let Some(h) = handle.take() {
        h.stop();
    }
    // dropping a TrayIcon removes it from the notification area
    entries.clear();
}

/// Starts the watcher and runs the tray message loop until Quit.
pub fn run(config: Config, watcher: SourceWatcher) -> anyhow::Result<()> {
    let event_loop = EventLoopBuilder::<UserEvent>::with_user_event().build();

    let proxy = event_loop.create_proxy();
    TrayIconEvent::set_event_handler(Some(move |event| {
        let _ = proxy.send_event(UserEvent::Tray(event));
    }));
    let proxy = event_loop.create_proxy();
    MenuEvent::set_event_handler(Some(move |event| {
        let _ = proxy.send_event(UserEvent::Menu(event));
    }));

    let proxy = event_loop.create_proxy();
    let mut handle = Some(watcher.start(move |update| {
        let _ = proxy.send_event(UserEvent::IconUpdated(update));
    })?);

    let mut entries: Vec<TrayEntry> = Vec::new();

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Wait;

        match event {
            Event::NewEvents(StartCause::Init) => {
                for (i, icon) in config.icons.iter().enumerate() {
                    match create_entry(i, icon) {
                        Ok(entry) => entries.push(entry),
                        Err(e) => report::error(format!("Failed to add tray icon for {}: {}", icon.dst.display(), e)),
                    }
                }
                if entries.is_empty() {
                    report::error("No tray icon could be shown. Exiting.");
                    shutdown(&mut handle, &mut entries);
                    *control_flow = ControlFlow::ExitWithCode(1);
                    return;
                }
                report::info(format!("Showing {} tray icon(s)", entries.len()));
            }
            Event::UserEvent(UserEvent::IconUpdated(update)) => refresh(&mut entries, &config, &update),
            Event::UserEvent(UserEvent::Menu(event)) => match menu_action(&event.id.0) {
                Some(Action::Regenerate) => {
                    report::info("Regenerating all icons");
                    if let Some(h) = &handle {
                        h.regenerate_all();
                    }
                }
                Some(Action::Quit) => {
                    report::info("Goodbye");
                    shutdown(&mut handle, &mut entries);
                    *control_flow = ControlFlow::Exit;
                }
                None => report::detail(format!("Unknown menu command: {}", event.id.0)),
            },
            Event::UserEvent(UserEvent::Tray(event)) => match event {
                TrayIconEvent::DoubleClick {
                    button: MouseButton::Left,
                    ..
                } => {
                    report::info("Double-clicked tray icon - goodbye");
                    shutdown(&mut handle, &mut entries);
                    *control_flow = ControlFlow::Exit;
                }
                TrayIconEvent::Click {
                    id,
                    button: MouseButton::Left,
                    button_state: MouseButtonState::Up,
                    ..
                } => report::detail(format!("Tray icon {} clicked", id.0)),
                _ => {}
            },
            _ => {}
        }
    })
}
