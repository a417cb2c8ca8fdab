// RowMon - Bluedroid GATT Server
//
// Binds the link traits to the ESP-IDF Bluedroid stack: registers the
// Fitness Machine Service with its Rower Data (notify) and Feature (read)
// characteristics, configures advertising and forwards connect, disconnect
// and CCCD events to the connection manager.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use esp_idf_svc::bt::ble::gap::{AdvConfiguration, BleGapEvent, EspBleGap};
use esp_idf_svc::bt::ble::gatt::server::{ConnectionId, EspGatts, GattsEvent, TransferId};
use esp_idf_svc::bt::ble::gatt::{
    AutoResponse, GattCharacteristic, GattDescriptor, GattId, GattInterface, GattResponse,
    GattServiceId, GattStatus, Handle, Permission, Property,
};
use esp_idf_svc::bt::{Ble, BtDriver, BtStatus, BtUuid};
use esp_idf_svc::sys::{EspError, ESP_ERR_INVALID_STATE, ESP_FAIL};

use crate::ble::connection::ConnectionManager;
use crate::ble::ftms::{self, Access, ROWER_DATA_LEN};
use crate::ble::{Advertiser, ConnId, LinkConnection};
use crate::config::*;
use crate::error::LinkError;

pub type BleDriver = BtDriver<'static, Ble>;
pub type Gap = Arc<EspBleGap<'static, Ble, Arc<BleDriver>>>;
pub type Gatts = Arc<EspGatts<'static, Ble, Arc<BleDriver>>>;

const APP_ID: u16 = 0;
const SERVICE_HANDLES: u16 = 8;
const CCCD_NOTIFY: u16 = 0x0001;

// ---------------------------------------------------------------------------
// Link trait bindings
// ---------------------------------------------------------------------------

pub struct EspLinkConnection {
    conn_id: ConnId,
    gatt_if: GattInterface,
    rower_data_handle: Handle,
    gatts: Gatts,
}

impl LinkConnection for EspLinkConnection {
    fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    fn notify(&self, uuid: u16, payload: &[u8]) -> Result<(), LinkError> {
        if uuid != UUID_ROWER_DATA {
            return Err(LinkError::NotifyFailed(ESP_ERR_INVALID_STATE as i32));
        }
        self.gatts
            .notify(self.gatt_if, self.conn_id, self.rower_data_handle, payload)
            .map_err(|e| LinkError::NotifyFailed(e.code()))
    }
}

pub struct EspAdvertiser {
    gap: Gap,
}

impl Advertiser for EspAdvertiser {
    fn start_advertising(&self) -> Result<(), LinkError> {
        self.gap
            .start_advertising()
            .map_err(|e| LinkError::AdvertisingFailed(e.code()))
    }
}

// ---------------------------------------------------------------------------
// GATT server
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GattState {
    service_handle: Option<Handle>,
    rower_data_handle: Option<Handle>,
    rower_data_cccd_handle: Option<Handle>,
}

pub struct FtmsServer {
    gap: Gap,
    gatts: Gatts,
    connections: Arc<ConnectionManager<EspLinkConnection>>,
    state: Mutex<GattState>,
}

impl FtmsServer {
    /// Bring up the GAP/GATT services on `driver` and register the app.
    /// Advertising starts once the service is in place.
    pub fn start(driver: Arc<BleDriver>) -> anyhow::Result<(Arc<Self>, Arc<ConnectionManager<EspLinkConnection>>)> {
        let gap: Gap = Arc::new(EspBleGap::new(driver.clone())?);
        let gatts: Gatts = Arc::new(EspGatts::new(driver)?);

        let advertiser = Arc::new(EspAdvertiser { gap: gap.clone() });
        let connections = Arc::new(ConnectionManager::new(advertiser, ADV_RESTART_DELAY)?);

        let server = Arc::new(Self {
            gap,
            gatts,
            connections: connections.clone(),
            state: Mutex::new(GattState::default()),
        });

        let gap_server = server.clone();
        server.gap.subscribe(move |event| {
            gap_server.check(gap_server.on_gap_event(event));
        })?;

        let gatts_server = server.clone();
        server.gatts.subscribe(move |(gatt_if, event)| {
            gatts_server.check(gatts_server.on_gatts_event(gatt_if, event));
        })?;

        server.gatts.register_app(APP_ID)?;
        log::info!("BLE GATT server registered as '{}'", DEVICE_NAME);

        Ok((server, connections))
    }

    fn check(&self, result: Result<(), EspError>) {
        if let Err(e) = result {
            log::warn!("BLE event handling failed: {:?}", e);
        }
    }

    fn state(&self) -> MutexGuard<'_, GattState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_gap_event(&self, event: BleGapEvent) -> Result<(), EspError> {
        if let BleGapEvent::AdvertisingConfigured(status) = event {
            check_bt_status(status)?;
            self.connections.start_advertising();
        }
        Ok(())
    }

    fn on_gatts_event(&self, gatt_if: GattInterface, event: GattsEvent) -> Result<(), EspError> {
        match event {
            GattsEvent::ServiceRegistered { status, app_id } => {
                check_gatt_status(status)?;
                if app_id == APP_ID {
                    self.create_service(gatt_if)?;
                }
            }
            GattsEvent::ServiceCreated { status, service_handle, .. } => {
                check_gatt_status(status)?;
                self.state().service_handle = Some(service_handle);
                self.gatts.start_service(service_handle)?;
                self.add_characteristics(service_handle)?;
            }
            GattsEvent::CharacteristicAdded { status, attr_handle, service_handle, char_uuid } => {
                check_gatt_status(status)?;
                self.register_characteristic(service_handle, attr_handle, char_uuid)?;
            }
            GattsEvent::DescriptorAdded { status, attr_handle, service_handle, descr_uuid } => {
                check_gatt_status(status)?;
                let mut state = self.state();
                if state.service_handle == Some(service_handle) && descr_uuid == BtUuid::uuid16(UUID_CCCD) {
                    state.rower_data_cccd_handle = Some(attr_handle);
                }
            }
            GattsEvent::PeerConnected { conn_id, .. } => {
                self.on_peer_connected(gatt_if, conn_id);
            }
            GattsEvent::PeerDisconnected { conn_id, reason, .. } => {
                log::info!("Client {} disconnected (reason {:?})", conn_id, reason);
                self.connections.on_disconnected(conn_id);
            }
            GattsEvent::Write { conn_id, trans_id, handle, offset, need_rsp, is_prep, value, .. } => {
                self.on_write(conn_id, handle, value);
                if need_rsp {
                    self.send_write_response(gatt_if, conn_id, trans_id, handle, offset, is_prep, value)?;
                }
            }
            _ => (),
        }
        Ok(())
    }

    fn create_service(&self, gatt_if: GattInterface) -> Result<(), EspError> {
        self.gap.set_device_name(DEVICE_NAME)?;
        self.gap.set_adv_conf(&AdvConfiguration {
            include_name: true,
            include_txpower: false,
            flag: 0x06, // LE general discoverable, BR/EDR not supported
            service_uuid: Some(BtUuid::uuid16(UUID_FTMS_SERVICE)),
            ..Default::default()
        })?;

        self.gatts.create_service(
            gatt_if,
            &GattServiceId {
                id: GattId { uuid: BtUuid::uuid16(UUID_FTMS_SERVICE), inst_id: 0 },
                is_primary: true,
            },
            SERVICE_HANDLES,
        )
    }

    fn add_characteristics(&self, service_handle: Handle) -> Result<(), EspError> {
        let feature = ftms::feature_value();
        for (uuid, access) in ftms::CHARACTERISTICS {
            let value: &[u8] = match access {
                Access::Notify => &[0u8; ROWER_DATA_LEN],
                Access::Read => &feature,
            };
            self.gatts.add_characteristic(service_handle, &characteristic(uuid, access, value.len()), value)?;
        }
        Ok(())
    }

    fn register_characteristic(&self, service_handle: Handle, attr_handle: Handle, uuid: BtUuid) -> Result<(), EspError> {
        let needs_cccd = {
            let mut state = self.state();
            if state.service_handle != Some(service_handle) {
                false
            } else if uuid == BtUuid::uuid16(UUID_ROWER_DATA) {
                state.rower_data_handle = Some(attr_handle);
                true
            } else {
                false
            }
        };

        if needs_cccd {
            self.gatts.add_descriptor(
                service_handle,
                &GattDescriptor {
                    uuid: BtUuid::uuid16(UUID_CCCD),
                    permissions: Permission::Read | Permission::Write,
                },
            )?;
        }
        Ok(())
    }

    fn on_peer_connected(&self, gatt_if: GattInterface, conn_id: ConnectionId) {
        let Some(rower_data_handle) = self.state().rower_data_handle else {
            log::warn!("Client {} connected before the service was ready", conn_id);
            return;
        };
        self.connections.on_connected(Arc::new(EspLinkConnection {
            conn_id,
            gatt_if,
            rower_data_handle,
            gatts: self.gatts.clone(),
        }));
    }

    fn on_write(&self, conn_id: ConnectionId, handle: Handle, value: &[u8]) {
        if self.state().rower_data_cccd_handle != Some(handle) || value.len() != 2 {
            return;
        }
        let cccd = u16::from_le_bytes([value[0], value[1]]);
        self.connections.set_subscribed(conn_id, cccd & CCCD_NOTIFY != 0);
    }

    #[allow(clippy::too_many_arguments)]
    fn send_write_response(
        &self,
        gatt_if: GattInterface,
        conn_id: ConnectionId,
        trans_id: TransferId,
        handle: Handle,
        offset: u16,
        is_prep: bool,
        value: &[u8],
    ) -> Result<(), EspError> {
        if is_prep {
            let mut response = GattResponse::new();
            response
                .attr_handle(handle)
                .auth_req(0)
                .offset(offset)
                .value(value)
                .map_err(|_| EspError::from_infallible::<ESP_FAIL>())?;
            self.gatts
                .send_response(gatt_if, conn_id, trans_id, GattStatus::Ok, Some(&response))
        } else {
            self.gatts.send_response(gatt_if, conn_id, trans_id, GattStatus::Ok, None)
        }
    }
}

fn characteristic(uuid: u16, access: Access, max_len: usize) -> GattCharacteristic {
    let (permissions, properties) = match access {
        // Notify-only: the value is never read or written directly.
        Access::Notify => (Default::default(), Property::Notify.into()),
        Access::Read => (Permission::Read.into(), Property::Read.into()),
    };
    GattCharacteristic {
        uuid: BtUuid::uuid16(uuid),
        permissions,
        properties,
        max_len,
        auto_rsp: AutoResponse::ByGatt,
    }
}

fn check_bt_status(status: BtStatus) -> Result<(), EspError> {
    if matches!(status, BtStatus::Success) {
        Ok(())
    } else {
        log::warn!("BT status: {:?}", status);
        Err(EspError::from_infallible::<ESP_FAIL>())
    }
}

fn check_gatt_status(status: GattStatus) -> Result<(), EspError> {
    if matches!(status, GattStatus::Ok) {
        Ok(())
    } else {
        log::warn!("GATT status: {:?}", status);
        Err(EspError::from_infallible::<ESP_FAIL>())
    }
}
