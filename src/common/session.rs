//! セッション管理
//!
//! `SessionManager` がアクティブなセッションを高々1つ保持し、
//! `SessionHandle` を通してリクエスト・レスポンスから参照する。
//! 長時間動作するホストはリクエストごとに `destroy_instance` を呼ぶ必要がある。

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{Error, ErrorKind};
use super::ParameterMap;

thread_local! {
    static MANAGER_ALIVE: Cell<bool> = Cell::new(false);
}

/// セッションのデータ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// セッションID（一意なトークン）
    pub id: String,
    /// 有効期限（エポック秒）
    pub expire: i64,
    pub data: ParameterMap,
}

impl SessionRecord {
    /// 新しいIDで作成し、現在時刻 + ttl秒を有効期限にする
    pub fn fresh(ttl_secs: u64) -> Self {
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        Self {
            id: Uuid::new_v4().to_string(),
            expire: Utc::now().timestamp().saturating_add(ttl),
            data: ParameterMap::new(),
        }
    }

    /// 指定時刻（エポック秒）で期限切れかどうか
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expire <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }
}

/// セッションの永続化層
///
/// 保存先の実装はホスト側の責務。
#[cfg_attr(test, mockall::automock)]
pub trait SessionPersistence {
    /// IDからセッションを読み込む（存在しなければ `None`）
    fn load(&self, id: &str) -> Result<Option<SessionRecord>, Error>;

    /// セッションを保存する
    fn save(&mut self, record: &SessionRecord) -> Result<(), Error>;
}

/// プロセス内メモリに保持する永続化層（再起動で消える）
#[derive(Debug, Default, Clone)]
pub struct MemorySessionStore {
    records: HashMap<String, SessionRecord>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&SessionRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl SessionPersistence for MemorySessionStore {
    fn load(&self, id: &str) -> Result<Option<SessionRecord>, Error> {
        Ok(self.records.get(id).cloned())
    }

    fn save(&mut self, record: &SessionRecord) -> Result<(), Error> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }
}

/// セッションの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Active,
}

#[derive(Debug)]
struct SessionSlot {
    record: Option<SessionRecord>,
    writable: bool,
    ttl_secs: u64,
}

impl SessionSlot {
    fn mint(&mut self) -> &mut SessionRecord {
        let record = SessionRecord::fresh(self.ttl_secs);
        info!("Started new session {}", record.id);
        self.writable = true;
        self.record.insert(record)
    }
}

/// アクティブなセッションへの参照
///
/// クローンしても同じセッションを指す。
/// セッション未作成の状態で `set_param` を呼ぶと、その場で新しいセッションが作られる。
#[derive(Debug, Clone)]
pub struct SessionHandle {
    slot: Rc<RefCell<SessionSlot>>,
}

impl SessionHandle {
    /// セッションが存在するかどうか
    pub fn is_active(&self) -> bool {
        self.slot.borrow().record.is_some()
    }

    pub fn id(&self) -> Option<String> {
        self.slot.borrow().record.as_ref().map(|r| r.id.clone())
    }

    /// 有効期限（エポック秒）
    pub fn expire(&self) -> Option<i64> {
        self.slot.borrow().record.as_ref().map(|r| r.expire)
    }

    /// 書き込み可能かどうか
    pub fn is_writable(&self) -> bool {
        let slot = self.slot.borrow();
        slot.record.is_none() || slot.writable
    }

    /// セッション変数を取得
    pub fn get_param(&self, name: &str) -> Result<String, Error> {
        self.slot
            .borrow()
            .record
            .as_ref()
            .and_then(|r| r.data.get(name).cloned())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::ParamNotFound,
                    format!("Parameter {} not found in session", name),
                )
            })
    }

    /// セッション変数を設定
    ///
    /// 読み取り専用で再開したセッションではSessionRequestModeになる。
    pub fn set_param(&self, name: impl Into<String>, value: impl Into<String>) -> Result<(), Error> {
        let mut slot = self.slot.borrow_mut();
        if slot.record.is_some() && !slot.writable {
            return Err(Error::new(
                ErrorKind::SessionRequestMode,
                "Session was resumed read-only and cannot be modified",
            ));
        }
        if slot.record.is_none() {
            slot.mint();
        }
        if let Some(record) = slot.record.as_mut() {
            record.data.insert(name.into(), value.into());
        }
        Ok(())
    }

    /// セッション変数のコピーを取得（未作成なら空）
    pub fn data(&self) -> ParameterMap {
        self.slot
            .borrow()
            .record
            .as_ref()
            .map(|r| r.data.clone())
            .unwrap_or_default()
    }

    /// 現在のセッションのスナップショット
    pub fn snapshot(&self) -> Option<SessionRecord> {
        self.slot.borrow().record.clone()
    }
}

/// セッションのライフサイクルを管理する
///
/// 1スレッドにつき同時に1つだけ作成できる。
pub struct SessionManager<P: SessionPersistence> {
    slot: Rc<RefCell<SessionSlot>>,
    persistence: P,
    resumed_writable: bool,
}

impl<P: SessionPersistence> SessionManager<P> {
    /// 新しいマネージャを作成
    pub fn new(config: &SessionConfig, persistence: P) -> Result<Self, Error> {
        let already = MANAGER_ALIVE.with(|alive| alive.replace(true));
        if already {
            return Err(Error::new(
                ErrorKind::MoreThanOneSessionInstance,
                "A session manager is already alive in this thread",
            ));
        }

        Ok(Self {
            slot: Rc::new(RefCell::new(SessionSlot {
                record: None,
                writable: true,
                ttl_secs: config.expire,
            })),
            persistence,
            resumed_writable: config.resumed_writable,
        })
    }

    pub fn state(&self) -> SessionState {
        if self.slot.borrow().record.is_some() {
            SessionState::Active
        } else {
            SessionState::Uninitialized
        }
    }

    /// セッションを作成せずにハンドルだけを取得
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            slot: Rc::clone(&self.slot),
        }
    }

    /// アクティブなセッションを取得し、無ければ作成する
    ///
    /// IDが空なら新規作成、そうでなければ永続化層から再開する。
    /// 既にアクティブなセッションがあれば、IDに関わらずそれを返す。
    pub fn get_instance(&mut self, id: Option<&str>) -> Result<SessionHandle, Error> {
        if let Some(current) = self.slot.borrow().record.as_ref() {
            if let Some(requested) = id.filter(|i| !i.is_empty() && *i != current.id) {
                warn!(
                    "Session {} is still active; ignoring requested id {}",
                    current.id, requested
                );
            }
            return Ok(self.handle());
        }

        let resumed = match id.filter(|i| !i.is_empty()) {
            Some(id) => match self.persistence.load(id)? {
                Some(record) if record.is_expired() => {
                    debug!("Session {} has expired, starting a new one", id);
                    None
                }
                Some(record) => Some(record),
                None => {
                    debug!("Session {} is unknown, starting a new one", id);
                    None
                }
            },
            None => None,
        };

        let mut slot = self.slot.borrow_mut();
        match resumed {
            Some(record) => {
                debug!("Resumed session {}", record.id);
                slot.record = Some(record);
                slot.writable = self.resumed_writable;
            }
            None => {
                slot.mint();
            }
        }
        drop(slot);
        Ok(self.handle())
    }

    /// アクティブなセッションを保存して破棄する
    ///
    /// 破棄したセッションを返す。セッションが無ければ何もしない。
    pub fn destroy_instance(&mut self) -> Result<Option<SessionRecord>, Error> {
        let record = {
            let mut slot = self.slot.borrow_mut();
            slot.writable = true;
            slot.record.take()
        };

        if let Some(record) = &record {
            debug!("Saving session {}", record.id);
            self.persistence.save(record)?;
        }
        Ok(record)
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }
}

impl<P: SessionPersistence> Drop for SessionManager<P> {
    fn drop(&mut self) {
        MANAGER_ALIVE.with(|alive| alive.set(false));
    }
}
