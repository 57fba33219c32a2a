//! Synchronization with remote stores.
//!
//! The core does not speak any wire protocol; it consumes a two-method
//! [`Remote`] capability whose `fetch` and `push` move objects behind the
//! scenes and report the resulting head as an opaque hex string. The thin
//! driver here chooses the head to adopt and feeds it into the ordinary
//! head-update and merge machinery. [`LocalRemote`] is a slice-backed
//! adapter between two in-process backends, enough to exercise the whole
//! path without a network layer.

use std::error::Error as StdError;
use std::fmt;
use std::fmt::Debug;
use std::future::Future;

use url::Url;

use crate::config::Config;
use crate::hash::Digest;
use crate::hash::Handle;
use crate::hash::HashProtocol;
use crate::repo::Backend;
use crate::repo::StoreError;
use crate::repo::TagName;
use crate::slice;
use crate::slice::SliceParams;
use crate::store::BlocksErr;
use crate::store::CommitHandle;
use crate::store::NamesErr;
use crate::store::Schema;
use crate::store::Store;

/// The remote capability: move objects, report the resulting head.
pub trait Remote<H: HashProtocol> {
    type Err: StdError + Debug + Send + Sync + 'static;

    fn fetch(
        &self,
        config: &Config,
        depth: Option<usize>,
        uri: &Url,
    ) -> impl Future<Output = Result<Option<String>, Self::Err>>;

    fn push(
        &self,
        config: &Config,
        depth: Option<usize>,
        uri: &Url,
    ) -> impl Future<Output = Result<Option<String>, Self::Err>>;
}

/// Failure of a sync operation.
#[derive(Debug)]
pub enum SyncError<RE, BE, NE> {
    /// The remote capability failed.
    Remote(RE),
    /// The local engine failed.
    Store(StoreError<BE, NE>),
    /// The remote reported a head that does not parse as a digest.
    BadHead(String),
}

impl<RE: fmt::Display, BE: fmt::Display, NE: fmt::Display> fmt::Display for SyncError<RE, BE, NE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Remote(e) => write!(f, "remote failure: {e}"),
            SyncError::Store(e) => write!(f, "{e}"),
            SyncError::BadHead(head) => write!(f, "remote reported unparsable head {head}"),
        }
    }
}

impl<RE, BE, NE> StdError for SyncError<RE, BE, NE>
where
    RE: StdError + 'static,
    BE: StdError + 'static,
    NE: StdError + 'static,
{
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            SyncError::Remote(e) => Some(e),
            SyncError::Store(e) => Some(e),
            SyncError::BadHead(_) => None,
        }
    }
}

impl<RE, BE, NE> From<StoreError<BE, NE>> for SyncError<RE, BE, NE> {
    fn from(e: StoreError<BE, NE>) -> Self {
        SyncError::Store(e)
    }
}

type StoreSyncError<S, B, R> =
    SyncError<<R as Remote<<S as Schema>::Hash>>::Err, BlocksErr<S, B>, NamesErr<S, B>>;

impl<S, B> Store<S, B>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    /// Fetches from `uri` and returns the head to adopt: the remote's
    /// reported head when it gives one, else the branch matching this
    /// handle's tag, else any remote ref now present locally.
    pub async fn fetch<R>(
        &self,
        remote: &R,
        uri: &Url,
        depth: Option<usize>,
    ) -> Result<Option<CommitHandle<S>>, StoreSyncError<S, B, R>>
    where
        R: Remote<S::Hash>,
    {
        let reported = remote
            .fetch(self.config(), depth, uri)
            .await
            .map_err(SyncError::Remote)?;
        if let Some(hex) = reported {
            let digest =
                Digest::from_hex(&hex).map_err(|_| SyncError::BadHead(hex))?;
            return Ok(Some(Handle::from_digest(digest)));
        }

        if let Some(tag) = self.tag() {
            if let Some(digest) = self
                .backend()
                .head(tag)
                .await
                .map_err(|e| SyncError::Store(StoreError::Names(e)))?
            {
                return Ok(Some(Handle::from_digest(digest)));
            }
        }

        let mut tips = self
            .backend()
            .dump()
            .await
            .map_err(|e| SyncError::Store(StoreError::Names(e)))?;
        tips.sort();
        Ok(tips
            .into_iter()
            .next()
            .map(|(_, digest)| Handle::from_digest(digest)))
    }

    /// Fetch followed by an unconditional head update.
    pub async fn pull<R>(
        &mut self,
        remote: &R,
        uri: &Url,
        depth: Option<usize>,
    ) -> Result<Option<CommitHandle<S>>, StoreSyncError<S, B, R>>
    where
        R: Remote<S::Hash>,
    {
        let head = self.fetch(remote, uri, depth).await?;
        if let Some(head) = head {
            self.update_head(head).await?;
        }
        Ok(head)
    }

    /// Fetch followed by a three-way merge into the current head.
    pub async fn pull_merge<R>(
        &mut self,
        remote: &R,
        uri: &Url,
        depth: Option<usize>,
    ) -> Result<Option<CommitHandle<S>>, StoreSyncError<S, B, R>>
    where
        R: Remote<S::Hash>,
    {
        let head = self.fetch(remote, uri, depth).await?;
        if let Some(head) = head {
            self.merge_head(head).await?;
        }
        Ok(head)
    }

    /// Pushes to `uri` and returns the remote's new head when reported.
    pub async fn push<R>(
        &self,
        remote: &R,
        uri: &Url,
        depth: Option<usize>,
    ) -> Result<Option<CommitHandle<S>>, StoreSyncError<S, B, R>>
    where
        R: Remote<S::Hash>,
    {
        let reported = remote
            .push(self.config(), depth, uri)
            .await
            .map_err(SyncError::Remote)?;
        match reported {
            Some(hex) => {
                let digest =
                    Digest::from_hex(&hex).map_err(|_| SyncError::BadHead(hex))?;
                Ok(Some(Handle::from_digest(digest)))
            }
            None => Ok(None),
        }
    }
}

/// A [`Remote`] between two in-process backends, transported as slices.
///
/// `fetch` exports from the remote side and imports here; `push` does the
/// reverse. The reported head is the remote (respectively local) `master`
/// tip, matching how a freshly synchronized handle resolves its head.
pub struct LocalRemote<S: Schema, B: Backend<S::Hash, S::Tag>> {
    local: B,
    remote: B,
    _schema: std::marker::PhantomData<fn(S) -> ()>,
}

impl<S, B> LocalRemote<S, B>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    pub fn new(local: B, remote: B) -> Self {
        LocalRemote {
            local,
            remote,
            _schema: std::marker::PhantomData,
        }
    }
}

impl<S, B> Remote<S::Hash> for LocalRemote<S, B>
where
    S: Schema,
    B: Backend<S::Hash, S::Tag>,
{
    type Err = crate::store::Error<S, B>;

    async fn fetch(
        &self,
        _config: &Config,
        depth: Option<usize>,
        _uri: &Url,
    ) -> Result<Option<String>, Self::Err> {
        let mut bundle = slice::export::<S, B>(
            &self.remote,
            SliceParams {
                depth,
                ..SliceParams::default()
            },
        )
        .await?;
        // Objects only: fetching must not move local branches.
        bundle.tags.clear();
        slice::import_force::<S, B>(&self.local, &bundle).await?;
        let head = self
            .remote
            .head(&S::Tag::master())
            .await
            .map_err(StoreError::Names)?;
        Ok(head.map(|digest| digest.to_hex()))
    }

    async fn push(
        &self,
        _config: &Config,
        depth: Option<usize>,
        _uri: &Url,
    ) -> Result<Option<String>, Self::Err> {
        let bundle = slice::export::<S, B>(
            &self.local,
            SliceParams {
                depth,
                ..SliceParams::default()
            },
        )
        .await?;
        slice::import_force::<S, B>(&self.remote, &bundle).await?;
        let head = self
            .local
            .head(&S::Tag::master())
            .await
            .map_err(StoreError::Names)?;
        Ok(head.map(|digest| digest.to_hex()))
    }
}
