//! mudmux 終端前端
//!
//! 極簡的行導向前端：一條執行緒讀 stdin 並把輸入交給使用中的
//! Session，主迴圈排空 UI 訊息通道。分割窗格等版面訊息在這個
//! 前端只記錄不渲染。

use std::io::BufRead;
use std::sync::{Arc, Mutex};

use mudcore::session::{SessionHandler, UiMessage};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日誌
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (handler, mut rx) = SessionHandler::new()?;
    let handler = Arc::new(Mutex::new(handler));

    // stdin 讀取執行緒：逐行交給管理器（在這條執行緒上阻塞送出
    // UI 訊息，與讀取/計時執行緒共享同一套背壓）
    let input_handler = Arc::clone(&handler);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            input_handler.lock().unwrap().handle_input(&line);
        }
        info!("stdin 關閉，輸入執行緒結束");
    });

    // UI 迴圈：照通道順序呈現 Session 訊息。使用中的 Session 名稱
    // 從 SessionChanged 訊息追蹤，迴圈本身不碰 handler 鎖：
    // 輸入執行緒可能正拿著鎖阻塞在滿的通道上（背壓），這裡再去
    // 搶鎖就會卡死整條排水路徑。
    let mut active = String::from("zif");
    while let Some(message) = rx.recv().await {
        match message {
            UiMessage::Update { session, content } => {
                if session == active {
                    print!("{content}");
                }
            }
            UiMessage::SessionChanged { session } => {
                active = session;
                println!("\n[session: {active}]");
            }
            UiMessage::PasswordMode { session, enabled } => {
                debug!(session, enabled, "密碼模式切換");
            }
            UiMessage::Disconnected { session } => {
                println!("\n[{session}] connection closed");
            }
            UiMessage::Layout { command, args, .. } => {
                debug!(command, ?args, "版面訊息（此前端不渲染）");
            }
        }
    }

    Ok(())
}
