//! Integrations and workspace learnings.

use redb::ReadableTable;

use crate::error::{InquestError, Result};
use crate::model::{Integration, Learning};
use crate::store::{Store, INTEGRATIONS, LEARNINGS};

impl Store {
    pub fn insert_integration(&self, integration: &Integration) -> Result<()> {
        let value = serde_json::to_vec(integration)?;
        let wt = self.db().begin_write().map_err(InquestError::store)?;
        {
            let mut table = wt.open_table(INTEGRATIONS).map_err(InquestError::store)?;
            table
                .insert(integration.id, value.as_slice())
                .map_err(InquestError::store)?;
        }
        wt.commit().map_err(InquestError::store)?;
        Ok(())
    }

    pub fn get_integration(&self, id: u64) -> Result<Integration> {
        let rt = self.db().begin_read().map_err(InquestError::store)?;
        let table = rt.open_table(INTEGRATIONS).map_err(InquestError::store)?;
        match table.get(id).map_err(InquestError::store)? {
            Some(v) => Ok(serde_json::from_slice(v.value())?),
            None => Err(InquestError::IntegrationNotFound(id)),
        }
    }

    pub fn list_integrations(&self) -> Result<Vec<Integration>> {
        let rt = self.db().begin_read().map_err(InquestError::store)?;
        let table = rt.open_table(INTEGRATIONS).map_err(InquestError::store)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(InquestError::store)? {
            let (_, v) = entry.map_err(InquestError::store)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    pub fn insert_learning(&self, learning: &Learning) -> Result<()> {
        let value = serde_json::to_vec(learning)?;
        let wt = self.db().begin_write().map_err(InquestError::store)?;
        {
            let mut table = wt.open_table(LEARNINGS).map_err(InquestError::store)?;
            table
                .insert(learning.id, value.as_slice())
                .map_err(InquestError::store)?;
        }
        wt.commit().map_err(InquestError::store)?;
        Ok(())
    }

    pub fn list_learnings(&self, workspace_id: u64) -> Result<Vec<Learning>> {
        let rt = self.db().begin_read().map_err(InquestError::store)?;
        let table = rt.open_table(LEARNINGS).map_err(InquestError::store)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(InquestError::store)? {
            let (_, v) = entry.map_err(InquestError::store)?;
            let learning: Learning = serde_json::from_slice(v.value())?;
            if learning.workspace_id == workspace_id {
                result.push(learning);
            }
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
